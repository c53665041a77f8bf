//! Shadow search
//!
//! Adversarial retrieval: the negated query vector surfaces plausibly
//! contradictory entries while the original vector collects supports. Each
//! contradiction is classified by strength, and a credibility ratio weighs
//! reliability-scaled support mass against severity-weighted contradiction
//! mass.

use serde::{Deserialize, Serialize};

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// How sharply an entry contradicts the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContradictionClass {
    /// Strength >= 0.8: states the opposite outright
    DirectNegation,
    /// Strength >= 0.6: argues against
    Counterargument,
    /// Strength >= 0.5: offers a competing account
    Alternative,
    /// Below 0.5: carves out an exception
    Exception,
}

impl ContradictionClass {
    /// Classify a contradiction by its strength
    pub fn from_strength(strength: f64) -> Self {
        if strength >= 0.8 {
            ContradictionClass::DirectNegation
        } else if strength >= 0.6 {
            ContradictionClass::Counterargument
        } else if strength >= 0.5 {
            ContradictionClass::Alternative
        } else {
            ContradictionClass::Exception
        }
    }

    /// Severity multiplier applied to contradiction mass
    ///
    /// A perfect direct negation must push credibility below the 0.5
    /// midpoint even against a perfect support, so the sharper classes
    /// weigh above 1.
    pub fn severity(&self) -> f64 {
        match self {
            ContradictionClass::DirectNegation => 1.5,
            ContradictionClass::Counterargument => 1.25,
            ContradictionClass::Alternative => 1.0,
            ContradictionClass::Exception => 0.75,
        }
    }
}

// ============================================================================
// REPORT TYPES
// ============================================================================

/// An entry supporting the query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowSupport {
    /// The supporting entry
    pub entry_id: String,
    /// Similarity to the query vector
    pub score: f64,
    /// The entry's reliability
    pub l_score: f64,
}

/// An entry contradicting the query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowContradiction {
    /// The contradicting entry
    pub entry_id: String,
    /// Similarity to the negated query vector
    pub strength: f64,
    /// The entry's reliability
    pub l_score: f64,
    /// Strength classification
    pub classification: ContradictionClass,
}

/// Result of a shadow search
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowReport {
    /// Entries agreeing with the query, best first
    pub supports: Vec<ShadowSupport>,
    /// Entries opposing the query, strongest first
    pub contradictions: Vec<ShadowContradiction>,
    /// Reliability-weighted support share in [0, 1]; 0.5 when nothing was
    /// found on either side
    pub credibility: f64,
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// The shadow of a query vector
pub fn negate(vector: &[f32]) -> Vec<f32> {
    vector.iter().map(|x| -x).collect()
}

/// Assemble a report from scored, reliability-annotated candidates
///
/// `supports` and `contradictions` carry (entry_id, score, l_score); zero
/// scores are kept out of the mass sums but remain listed.
pub fn build_report(
    supports: Vec<(String, f64, f64)>,
    contradictions: Vec<(String, f64, f64)>,
) -> ShadowReport {
    let mut supports: Vec<ShadowSupport> = supports
        .into_iter()
        .map(|(entry_id, score, l_score)| ShadowSupport {
            entry_id,
            score: score.clamp(0.0, 1.0),
            l_score,
        })
        .collect();
    supports.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entry_id.cmp(&b.entry_id))
    });

    let mut contradictions: Vec<ShadowContradiction> = contradictions
        .into_iter()
        .map(|(entry_id, strength, l_score)| {
            let strength = strength.clamp(0.0, 1.0);
            ShadowContradiction {
                entry_id,
                strength,
                l_score,
                classification: ContradictionClass::from_strength(strength),
            }
        })
        .collect();
    contradictions.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entry_id.cmp(&b.entry_id))
    });

    let support_mass: f64 = supports.iter().map(|s| s.score * s.l_score).sum();
    let contradiction_mass: f64 = contradictions
        .iter()
        .map(|c| c.strength * c.l_score * c.classification.severity())
        .sum();

    let credibility = if support_mass + contradiction_mass <= f64::EPSILON {
        0.5
    } else {
        (support_mass / (support_mass + contradiction_mass)).clamp(0.0, 1.0)
    };

    ShadowReport {
        supports,
        contradictions,
        credibility,
    }
}

// ============================================================================
// TESTS
// ============================================================================
