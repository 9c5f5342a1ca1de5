use shared::{PredictionResponse, Severity};

use super::model::{NUM_CLASSES, ProbabilityVector};

pub const UNKNOWN_LABEL: &str = "Unknown Disease";

const HIGH_THRESHOLD: f64 = 80.0;
const MEDIUM_THRESHOLD: f64 = 50.0;

/// Labels in the order of the classifier's output units.
const LEAF_DISEASES: [&str; NUM_CLASSES] = [
    "Bacteria Spot Disease",
    "Early Blight Disease",
    "Healthy and Fresh",
    "Late Blight Disease",
    "Leaf Mold Disease",
    "Septoria Leaf Spot Disease",
    "Target Spot Disease",
    "Tomato Yellow Leaf Curl Virus Disease",
    "Tomato Mosaic Virus Disease",
    "Two Spotted Spider Mite Disease",
];

/// Read-only index → label table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMap {
    labels: Vec<String>,
}

impl ClassMap {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn leaf_diseases() -> Self {
        Self::new(LEAF_DISEASES.iter().map(|label| label.to_string()).collect())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        Self::leaf_diseases()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence_percent: f64,
    pub severity: Severity,
}

impl From<ClassificationResult> for PredictionResponse {
    fn from(result: ClassificationResult) -> Self {
        PredictionResponse {
            disease_name: result.label,
            confidence: result.confidence_percent,
            severity: result.severity,
        }
    }
}

/// Maps raw scores to a label, a rounded percentage and a severity tier.
pub fn interpret(vector: &ProbabilityVector, class_map: &ClassMap) -> ClassificationResult {
    let (label, confidence_percent) = match argmax(vector.as_slice()) {
        Some((index, max)) => (
            class_map.get(index).unwrap_or(UNKNOWN_LABEL).to_string(),
            round_percent(max),
        ),
        None => (UNKNOWN_LABEL.to_string(), 0.0),
    };

    ClassificationResult {
        label,
        severity: severity_for(confidence_percent),
        confidence_percent,
    }
}

/// First maximum wins on ties.
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, max)) if value <= max => {}
            _ => best = Some((index, value)),
        }
    }
    best
}

fn round_percent(probability: f32) -> f64 {
    (f64::from(probability) * 100.0 * 100.0).round() / 100.0
}

pub fn severity_for(confidence_percent: f64) -> Severity {
    if confidence_percent > HIGH_THRESHOLD {
        Severity::High
    } else if confidence_percent > MEDIUM_THRESHOLD {
        Severity::Medium
    } else {
        Severity::Low
    }
}
