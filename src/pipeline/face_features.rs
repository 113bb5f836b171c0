use crate::types::{
    DetectionResult, FaceFrameResult, FaceLandmarks, FacePointType, FaceProperty, Point2, PointF,
};

fn to_pixel(point: PointF) -> Point2 {
    // Truncate toward zero like the sensor SDK's integer color-space conversion.
    Point2::new(point.x as i32, point.y as i32)
}

/// Reads the five overlay landmarks out of a face result.
pub fn extract_landmarks(result: &FaceFrameResult) -> FaceLandmarks {
    FaceLandmarks {
        left_eye: to_pixel(result.point(FacePointType::EyeLeft)),
        right_eye: to_pixel(result.point(FacePointType::EyeRight)),
        nose: to_pixel(result.point(FacePointType::Nose)),
        mouth_left: to_pixel(result.point(FacePointType::MouthCornerLeft)),
        mouth_right: to_pixel(result.point(FacePointType::MouthCornerRight)),
        present: true,
    }
}

/// Short human-readable summary of the positive face properties, e.g. `"glasses, happy"`.
/// Properties the tracker was not asked for count as unknown.
pub fn describe_properties(result: &FaceFrameResult) -> String {
    let positives: Vec<&str> = FaceProperty::ALL
        .iter()
        .filter(|property| {
            matches!(
                result.property(**property),
                DetectionResult::Yes | DetectionResult::Maybe
            )
        })
        .map(|property| property.label())
        .collect();
    if positives.is_empty() {
        "neutral".to_string()
    } else {
        positives.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> FaceFrameResult {
        FaceFrameResult {
            points_in_color_space: [
                PointF::new(900.7, 400.2),
                PointF::new(1010.9, 398.0),
                PointF::new(955.5, 460.4),
                PointF::new(915.1, 520.8),
                PointF::new(995.0, 521.3),
            ],
            bounding_box: None,
            properties: vec![
                (FaceProperty::Happy, DetectionResult::Yes),
                (FaceProperty::WearingGlasses, DetectionResult::No),
                (FaceProperty::Engaged, DetectionResult::Yes),
                (FaceProperty::MouthOpen, DetectionResult::Maybe),
            ],
        }
    }

    #[test]
    fn landmarks_are_truncated_to_pixels() {
        let landmarks = extract_landmarks(&sample_result());
        assert!(landmarks.present);
        assert_eq!(landmarks.left_eye, Point2::new(900, 400));
        assert_eq!(landmarks.right_eye, Point2::new(1010, 398));
        assert_eq!(landmarks.nose, Point2::new(955, 460));
        assert_eq!(landmarks.mouth_left, Point2::new(915, 520));
        assert_eq!(landmarks.mouth_right, Point2::new(995, 521));
    }

    #[test]
    fn extraction_leaves_result_untouched() {
        let result = sample_result();
        let before = result.clone();
        let _ = extract_landmarks(&result);
        assert_eq!(result, before);
    }

    #[test]
    fn properties_summary() {
        let result = sample_result();
        assert_eq!(describe_properties(&result), "engaged, happy, mouth open");
        assert_eq!(
            result.property(FaceProperty::LeftEyeClosed),
            DetectionResult::Unknown
        );

        let bare = FaceFrameResult {
            properties: Vec::new(),
            ..result
        };
        assert_eq!(describe_properties(&bare), "neutral");
    }
}
