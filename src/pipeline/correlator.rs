use super::face_features::{describe_properties, extract_landmarks};
use crate::types::{BodyRecord, FaceFrameResult, FaceLandmarks, TrackingId, TrackingState};

/// Instruction for the face-tracking source, applied by whoever owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceCommand {
    Bind(TrackingId),
    Release,
}

/// Links the body stream to the face stream through a single tracking id slot.
///
/// Both streams arrive independently; the correlator only reacts to what each event
/// carries plus the face source's own validity flag, so its transitions are pure.
#[derive(Debug)]
pub struct TrackingCorrelator {
    state: TrackingState,
    landmarks: FaceLandmarks,
    expression: Option<String>,
}

impl Default for TrackingCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingCorrelator {
    pub fn new() -> Self {
        Self {
            state: TrackingState::Unbound,
            landmarks: FaceLandmarks::default(),
            expression: None,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn landmarks(&self) -> FaceLandmarks {
        self.landmarks
    }

    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    /// Handles one body frame. `face_id_valid` is the face source's current opinion of
    /// the id it was last given.
    pub fn on_body_frame(&mut self, bodies: &[BodyRecord], face_id_valid: bool) -> Option<FaceCommand> {
        if self.state.is_bound() && face_id_valid {
            return None;
        }

        match (first_tracked(bodies), self.state) {
            (Some(id), TrackingState::Bound(current)) if id == current => {
                // The face source dropped the id but the body is still here; hand it back.
                Some(FaceCommand::Bind(id))
            }
            (Some(id), previous) => {
                log::debug!("binding face tracking to body {id} (was {previous:?})");
                self.state = TrackingState::Bound(id);
                self.landmarks.clear();
                self.expression = None;
                Some(FaceCommand::Bind(id))
            }
            (None, TrackingState::Bound(lost)) => {
                log::debug!("body {lost} lost, face tracking unbound");
                self.reset();
                Some(FaceCommand::Release)
            }
            (None, TrackingState::Unbound) => None,
        }
    }

    /// Handles one face frame tagged with the body id it was produced for: `Some` when
    /// the tracker resolved the face, `None` when the body turned away or was occluded.
    /// Frames for any body other than the bound one are ignored.
    pub fn on_face_frame(
        &mut self,
        tracking_id: Option<TrackingId>,
        result: Option<&FaceFrameResult>,
    ) {
        let TrackingState::Bound(bound) = self.state else {
            if result.is_some() {
                log::trace!("ignoring face result while unbound");
            }
            return;
        };
        if tracking_id != Some(bound) {
            log::trace!("ignoring face frame for {tracking_id:?}, bound to body {bound}");
            return;
        }

        match result {
            Some(result) => {
                self.landmarks = extract_landmarks(result);
                self.expression = Some(describe_properties(result));
            }
            None => {
                self.landmarks.clear();
                self.expression = None;
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = TrackingState::Unbound;
        self.landmarks = FaceLandmarks::default();
        self.expression = None;
    }
}

fn first_tracked(bodies: &[BodyRecord]) -> Option<TrackingId> {
    bodies
        .iter()
        .find(|body| body.is_tracked)
        .map(|body| body.tracking_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceFrameResult, PointF};

    fn bodies(tracked: &[u64]) -> Vec<BodyRecord> {
        let mut list = vec![BodyRecord::default(); 6];
        for (slot, id) in list.iter_mut().skip(1).zip(tracked) {
            *slot = BodyRecord {
                is_tracked: true,
                tracking_id: TrackingId(*id),
            };
        }
        list
    }

    fn face() -> FaceFrameResult {
        FaceFrameResult {
            points_in_color_space: [PointF::new(10.0, 10.0); 5],
            bounding_box: None,
            properties: Vec::new(),
        }
    }

    #[test]
    fn first_tracked_body_binds() {
        let mut correlator = TrackingCorrelator::new();
        assert_eq!(correlator.state(), TrackingState::Unbound);

        let command = correlator.on_body_frame(&bodies(&[7]), false);
        assert_eq!(command, Some(FaceCommand::Bind(TrackingId(7))));
        assert_eq!(correlator.state(), TrackingState::Bound(TrackingId(7)));
    }

    #[test]
    fn encounter_order_wins() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[42, 7]), false);
        assert_eq!(correlator.state(), TrackingState::Bound(TrackingId(42)));
    }

    #[test]
    fn bound_state_survives_other_bodies_while_face_id_valid() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[7]), false);

        assert_eq!(correlator.on_body_frame(&bodies(&[9]), true), None);
        assert_eq!(correlator.on_body_frame(&bodies(&[]), true), None);
        assert_eq!(correlator.state(), TrackingState::Bound(TrackingId(7)));
    }

    #[test]
    fn untracked_bodies_do_not_bind() {
        let mut correlator = TrackingCorrelator::new();
        assert_eq!(correlator.on_body_frame(&bodies(&[]), false), None);
        assert_eq!(correlator.on_body_frame(&[], false), None);
        assert_eq!(correlator.state(), TrackingState::Unbound);
    }

    #[test]
    fn invalid_face_id_rebinds_to_current_body() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[7]), false);
        correlator.on_face_frame(Some(TrackingId(7)), Some(&face()));
        assert!(correlator.landmarks().present);

        let command = correlator.on_body_frame(&bodies(&[11]), false);
        assert_eq!(command, Some(FaceCommand::Bind(TrackingId(11))));
        assert_eq!(correlator.state(), TrackingState::Bound(TrackingId(11)));
        assert!(!correlator.landmarks().present);
    }

    #[test]
    fn queued_face_frame_for_previous_body_is_ignored() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[7]), false);
        correlator.on_body_frame(&bodies(&[11]), false);
        assert_eq!(correlator.state(), TrackingState::Bound(TrackingId(11)));

        correlator.on_face_frame(Some(TrackingId(7)), Some(&face()));
        assert!(!correlator.landmarks().present);
        assert_eq!(correlator.expression(), None);
        correlator.on_face_frame(None, Some(&face()));
        assert!(!correlator.landmarks().present);

        correlator.on_face_frame(Some(TrackingId(11)), Some(&face()));
        assert!(correlator.landmarks().present);
        correlator.on_face_frame(Some(TrackingId(7)), None);
        assert!(correlator.landmarks().present);
    }

    #[test]
    fn invalid_face_id_with_same_body_rebinds_quietly() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[7]), false);
        let command = correlator.on_body_frame(&bodies(&[7]), false);
        assert_eq!(command, Some(FaceCommand::Bind(TrackingId(7))));
        assert_eq!(correlator.state(), TrackingState::Bound(TrackingId(7)));
    }

    #[test]
    fn lost_body_unbinds_and_clears_face() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[7]), false);
        correlator.on_face_frame(Some(TrackingId(7)), Some(&face()));

        let command = correlator.on_body_frame(&bodies(&[]), false);
        assert_eq!(command, Some(FaceCommand::Release));
        assert_eq!(correlator.state(), TrackingState::Unbound);
        assert!(!correlator.landmarks().present);
    }

    #[test]
    fn face_presence_follows_face_results() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[3]), false);

        correlator.on_face_frame(Some(TrackingId(3)), Some(&face()));
        assert!(correlator.landmarks().present);
        assert_eq!(correlator.expression(), Some("neutral"));
        correlator.on_face_frame(Some(TrackingId(3)), None);
        assert!(!correlator.landmarks().present);
        assert_eq!(correlator.expression(), None);
        assert!(correlator.state().is_bound());
        correlator.on_face_frame(Some(TrackingId(3)), Some(&face()));
        assert!(correlator.landmarks().present);
    }

    #[test]
    fn face_results_are_ignored_while_unbound() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_face_frame(Some(TrackingId(1)), Some(&face()));
        assert!(!correlator.landmarks().present);
    }

    #[test]
    fn reset_returns_to_unbound() {
        let mut correlator = TrackingCorrelator::new();
        correlator.on_body_frame(&bodies(&[5]), false);
        correlator.on_face_frame(Some(TrackingId(5)), Some(&face()));
        correlator.reset();
        assert_eq!(correlator.state(), TrackingState::Unbound);
        assert_eq!(correlator.landmarks(), FaceLandmarks::default());
    }
}
