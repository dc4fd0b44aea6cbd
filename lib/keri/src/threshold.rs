//! Signing threshold evaluation
//!
//! A threshold is either a plain count of required signatures or a list of
//! weighted clauses. Weighted satisfaction walks every clause against the
//! set of verified signer positions; all clauses must individually reach a
//! weight sum of one.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::KeriError;
use crate::types::ThresholdSpec;

/// A positive fractional weight in (0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Weight {
    num: u64,
    den: u64,
}

impl Weight {
    pub fn new(num: u64, den: u64) -> Result<Self, KeriError> {
        if num == 0 || den == 0 || num > den {
            return Err(KeriError::Validation(format!(
                "Weight {num}/{den} outside (0, 1]"
            )));
        }
        Ok(Self { num, den })
    }

    /// Parses `"1"` or `"num/den"`.
    pub fn parse(text: &str) -> Result<Self, KeriError> {
        let bad = || KeriError::Validation(format!("Invalid weight: {text}"));
        match text.split_once('/') {
            Some((num, den)) => {
                let num = num.parse::<u64>().map_err(|_| bad())?;
                let den = den.parse::<u64>().map_err(|_| bad())?;
                Self::new(num, den)
            }
            None => {
                let num = text.parse::<u64>().map_err(|_| bad())?;
                Self::new(num, 1)
            }
        }
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Exact comparison: does the sum of `weights` reach one?
fn sum_reaches_one(weights: &[Weight]) -> bool {
    let lcm = weights.iter().fold(1u128, |acc, w| {
        let den = w.den as u128;
        acc / gcd(acc, den) * den
    });
    let total: u128 = weights
        .iter()
        .map(|w| w.num as u128 * (lcm / w.den as u128))
        .sum();
    total >= lcm
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Signing threshold satisfaction evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningThreshold {
    /// At least this many distinct signers.
    Count(u64),
    /// Clauses of fractional weights; every clause must reach one.
    Weighted(Vec<Vec<Weight>>),
}

impl SigningThreshold {
    pub fn from_spec(spec: &ThresholdSpec) -> Result<Self, KeriError> {
        match spec {
            ThresholdSpec::Count(text) => {
                let count = u64::from_str_radix(text, 16)
                    .map_err(|_| KeriError::Validation(format!("Invalid threshold: {text}")))?;
                if count == 0 {
                    return Err(KeriError::Validation(
                        "Threshold must be at least 1".to_string(),
                    ));
                }
                Ok(Self::Count(count))
            }
            ThresholdSpec::Weighted(clauses) => {
                if clauses.is_empty() {
                    return Err(KeriError::Validation("Empty threshold clauses".to_string()));
                }
                let mut parsed = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let weights = clause
                        .iter()
                        .map(|w| Weight::parse(w))
                        .collect::<Result<Vec<_>, _>>()?;
                    if weights.is_empty() {
                        return Err(KeriError::Validation(
                            "Empty threshold clause".to_string(),
                        ));
                    }
                    if !sum_reaches_one(&weights) {
                        return Err(KeriError::Validation(format!(
                            "Threshold clause weights sum below 1: {clause:?}"
                        )));
                    }
                    parsed.push(weights);
                }
                Ok(Self::Weighted(parsed))
            }
        }
    }

    pub fn to_spec(&self) -> ThresholdSpec {
        match self {
            Self::Count(count) => ThresholdSpec::count(*count),
            Self::Weighted(clauses) => ThresholdSpec::Weighted(
                clauses
                    .iter()
                    .map(|clause| clause.iter().map(|w| w.to_string()).collect())
                    .collect(),
            ),
        }
    }

    /// Minimum key list length this threshold implies.
    pub fn size(&self) -> usize {
        match self {
            Self::Count(count) => *count as usize,
            Self::Weighted(clauses) => clauses.iter().map(|c| c.len()).sum(),
        }
    }

    /// True when signatures at the given key positions meet the threshold.
    /// Duplicate indices count once; an empty set never satisfies.
    pub fn satisfy(&self, indices: &[u64]) -> bool {
        let unique: BTreeSet<u64> = indices.iter().copied().collect();
        if unique.is_empty() {
            return false;
        }
        match self {
            Self::Count(count) => unique.len() as u64 >= *count,
            Self::Weighted(clauses) => {
                let size = self.size();
                let mut satisfied = vec![false; size];
                for &index in &unique {
                    if (index as usize) < size {
                        satisfied[index as usize] = true;
                    }
                }
                let mut position = 0;
                for clause in clauses {
                    let met: Vec<Weight> = clause
                        .iter()
                        .enumerate()
                        .filter(|(offset, _)| satisfied[position + offset])
                        .map(|(_, w)| *w)
                        .collect();
                    position += clause.len();
                    if met.is_empty() || !sum_reaches_one(&met) {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Canonical string form, committed to by next-key digests.
    pub fn limen(&self) -> String {
        match self {
            Self::Count(count) => format!("{count:x}"),
            Self::Weighted(clauses) => clauses
                .iter()
                .map(|clause| {
                    clause
                        .iter()
                        .map(|w| w.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect::<Vec<_>>()
                .join("&"),
        }
    }
}
