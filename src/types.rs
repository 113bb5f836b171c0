use std::{fmt, ops::BitOr};

/// Identifier of one tracked body. Only meaningful while that body stays tracked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingId(pub u64);

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingState {
    Unbound,
    Bound(TrackingId),
}

impl TrackingState {
    pub fn tracking_id(&self) -> Option<TrackingId> {
        match self {
            TrackingState::Unbound => None,
            TrackingState::Bound(id) => Some(*id),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, TrackingState::Bound(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BodyRecord {
    pub is_tracked: bool,
    pub tracking_id: TrackingId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Point2 {
    pub x: i32,
    pub y: i32,
}

impl Point2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Sensor-space point as reported by the face tracker (sub-pixel color coordinates).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaceLandmarks {
    pub left_eye: Point2,
    pub right_eye: Point2,
    pub nose: Point2,
    pub mouth_left: Point2,
    pub mouth_right: Point2,
    pub present: bool,
}

impl FaceLandmarks {
    pub fn clear(&mut self) {
        self.present = false;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FacePointType {
    EyeLeft,
    EyeRight,
    Nose,
    MouthCornerLeft,
    MouthCornerRight,
}

impl FacePointType {
    pub const ALL: [FacePointType; 5] = [
        FacePointType::EyeLeft,
        FacePointType::EyeRight,
        FacePointType::Nose,
        FacePointType::MouthCornerLeft,
        FacePointType::MouthCornerRight,
    ];

    pub fn index(self) -> usize {
        match self {
            FacePointType::EyeLeft => 0,
            FacePointType::EyeRight => 1,
            FacePointType::Nose => 2,
            FacePointType::MouthCornerLeft => 3,
            FacePointType::MouthCornerRight => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceProperty {
    Engaged,
    WearingGlasses,
    Happy,
    LeftEyeClosed,
    RightEyeClosed,
    MouthOpen,
}

impl FaceProperty {
    pub const ALL: [FaceProperty; 6] = [
        FaceProperty::Engaged,
        FaceProperty::WearingGlasses,
        FaceProperty::Happy,
        FaceProperty::LeftEyeClosed,
        FaceProperty::RightEyeClosed,
        FaceProperty::MouthOpen,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FaceProperty::Engaged => "engaged",
            FaceProperty::WearingGlasses => "glasses",
            FaceProperty::Happy => "happy",
            FaceProperty::LeftEyeClosed => "left eye closed",
            FaceProperty::RightEyeClosed => "right eye closed",
            FaceProperty::MouthOpen => "mouth open",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionResult {
    Unknown,
    No,
    Maybe,
    Yes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Set of features requested from the face tracker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FaceFrameFeatures(u32);

impl FaceFrameFeatures {
    pub const NONE: Self = Self(0);
    pub const BOUNDING_BOX_IN_COLOR_SPACE: Self = Self(1 << 0);
    pub const POINTS_IN_COLOR_SPACE: Self = Self(1 << 1);
    pub const FACE_ENGAGEMENT: Self = Self(1 << 2);
    pub const GLASSES: Self = Self(1 << 3);
    pub const HAPPY: Self = Self(1 << 4);
    pub const LEFT_EYE_CLOSED: Self = Self(1 << 5);
    pub const RIGHT_EYE_CLOSED: Self = Self(1 << 6);
    pub const MOUTH_OPEN: Self = Self(1 << 7);

    pub const OVERLAY: Self = Self(
        Self::BOUNDING_BOX_IN_COLOR_SPACE.0
            | Self::POINTS_IN_COLOR_SPACE.0
            | Self::FACE_ENGAGEMENT.0
            | Self::GLASSES.0
            | Self::HAPPY.0
            | Self::LEFT_EYE_CLOSED.0
            | Self::RIGHT_EYE_CLOSED.0
            | Self::MOUTH_OPEN.0,
    );

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for FaceFrameFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FaceFrameResult {
    /// Indexed by [`FacePointType::index`].
    pub points_in_color_space: [PointF; 5],
    pub bounding_box: Option<FaceRect>,
    pub properties: Vec<(FaceProperty, DetectionResult)>,
}

impl FaceFrameResult {
    pub fn point(&self, kind: FacePointType) -> PointF {
        self.points_in_color_space[kind.index()]
    }

    pub fn property(&self, property: FaceProperty) -> DetectionResult {
        self.properties
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, result)| *result)
            .unwrap_or(DetectionResult::Unknown)
    }
}
