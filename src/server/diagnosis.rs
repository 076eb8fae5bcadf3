//! 診断結果の説明文

use std::collections::HashMap;

use crate::types::Prediction;

pub const FALLBACK_DETAILS: &str = "No details available.";

/// ラベル → 説明文
#[derive(Debug, Clone)]
pub struct DiagnosisCatalog {
    details: HashMap<String, String>,
}

impl Default for DiagnosisCatalog {
    fn default() -> Self {
        let entries = [
            (
                "onycholysis",
                "Onycholysis is the painless separation of the nail from the nail bed.",
            ),
            (
                "psoriasis",
                "Psoriasis is a chronic autoimmune condition that causes skin cells to build up rapidly.",
            ),
            (
                "skin_infection",
                "Skin infections are caused by bacteria, viruses, or fungi affecting the skin.",
            ),
            (
                "stunted_growth",
                "Stunted growth is a condition where a child is significantly shorter than average for their age.",
            ),
        ];
        Self {
            details: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl DiagnosisCatalog {
    pub fn details(&self, label: &str) -> &str {
        self.details
            .get(label)
            .map(String::as_str)
            .unwrap_or(FALLBACK_DETAILS)
    }

    /// `Disease: ..\nProbability: ..%\nDetails: ..`
    pub fn report(&self, top: &Prediction) -> String {
        format!(
            "Disease: {}\nProbability: {}\nDetails: {}",
            top.label,
            format_percent(top.probability),
            self.details(&top.label)
        )
    }
}

/// 0.7 -> "70.00%"
pub fn format_percent(probability: f32) -> String {
    format!("{:.2}%", probability as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_format() {
        let catalog = DiagnosisCatalog::default();
        let text = catalog.report(&Prediction {
            label: "psoriasis".to_string(),
            probability: 0.7,
        });
        assert_eq!(
            text,
            "Disease: psoriasis\nProbability: 70.00%\nDetails: Psoriasis is a chronic autoimmune condition that causes skin cells to build up rapidly."
        );
    }

    #[test]
    fn test_unknown_label_falls_back() {
        let catalog = DiagnosisCatalog::default();
        assert_eq!(catalog.details("melanoma"), FALLBACK_DETAILS);
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(1.0), "100.00%");
        assert_eq!(format_percent(0.12345), "12.35%");
        assert_eq!(format_percent(0.0), "0.00%");
    }
}
