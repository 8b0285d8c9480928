//! Detection + classification fusion

use crate::types::{ClassificationResult, Detection};

/// Combine the primary detection and the classifier output into one result.
///
/// With only one input present it is used as is. With both, the label and
/// confidence come from whichever is more confident (the classifier wins
/// ties), and the classifier's raw scores are always carried forward.
pub fn fuse(
    detection: Option<&Detection>,
    classification: Option<&ClassificationResult>,
) -> Option<ClassificationResult> {
    match (detection, classification) {
        (None, None) => None,
        (Some(det), None) => Some(ClassificationResult::new(det.label.clone(), det.confidence)),
        (None, Some(cls)) => Some(cls.clone()),
        (Some(det), Some(cls)) if det.confidence > cls.confidence => Some(ClassificationResult {
            label: det.label.clone(),
            confidence: det.confidence,
            raw_scores: cls.raw_scores.clone(),
        }),
        (Some(_), Some(cls)) => Some(cls.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ioutrack::Bbox;

    fn det(confidence: f32) -> Detection {
        Detection::new("stop", confidence, Bbox::new(0, 0, 10, 10))
    }

    #[test]
    fn test_single_inputs_pass_through() {
        assert_eq!(fuse(None, None), None);

        let fused = fuse(Some(&det(0.7)), None).unwrap();
        assert_eq!(fused.label, "stop");
        assert_eq!(fused.confidence, 0.7);
        assert!(fused.raw_scores.is_none());

        let cls = ClassificationResult::new("yield", 0.4);
        assert_eq!(fuse(None, Some(&cls)), Some(cls));
    }

    #[test]
    fn test_detection_label_keeps_classifier_scores() {
        let cls = ClassificationResult::new("unclassified", 0.1).with_raw_scores(vec![0.1, 0.9]);
        let fused = fuse(Some(&det(0.9)), Some(&cls)).unwrap();
        assert_eq!(fused.label, "stop");
        assert_eq!(fused.confidence, 0.9);
        assert_eq!(fused.raw_scores, Some(vec![0.1, 0.9]));
    }

    #[test]
    fn test_classifier_wins_when_more_confident_or_tied() {
        let cls = ClassificationResult::new("speed_limit_50", 0.8);
        assert_eq!(fuse(Some(&det(0.6)), Some(&cls)).unwrap().label, "speed_limit_50");
        assert_eq!(fuse(Some(&det(0.8)), Some(&cls)).unwrap().label, "speed_limit_50");
    }
}
