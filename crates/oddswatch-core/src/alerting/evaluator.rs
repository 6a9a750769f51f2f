//! Rule evaluators
//!
//! The catalog is closed: win odds range, rate of change between polls, and exacta
//! payout range. Every evaluator is a pure function of the current value, the
//! previous value and the context it was observed in.

use tracing::warn;

use crate::config::AlertingConfig;
use crate::models::{AlertCandidate, AlertContext, RuleKind};

/// What an evaluator looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One runner's win odds
    Entry,
    /// One combination's payout
    Combination,
}

/// A single rule evaluator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluator {
    /// Win odds strictly outside `[min, max]`
    WinOddsRange {
        /// Lowest odds that do not alert
        min: f64,
        /// Highest odds that do not alert
        max: f64,
    },
    /// Win odds moved by at least `min_change_percent` since the previous poll
    RateOfChange {
        /// Smallest absolute change that alerts, in percent
        min_change_percent: f64,
    },
    /// Combination payout strictly outside `[min, max]`
    PayoutRange {
        /// Lowest payout that does not alert
        min: f64,
        /// Highest payout that does not alert
        max: f64,
    },
}

impl Evaluator {
    /// Which observations this evaluator applies to
    pub fn target(&self) -> Target {
        match self {
            Evaluator::WinOddsRange { .. } | Evaluator::RateOfChange { .. } => Target::Entry,
            Evaluator::PayoutRange { .. } => Target::Combination,
        }
    }

    /// Rules this evaluator can raise
    pub fn rules(&self) -> &'static [RuleKind] {
        match self {
            Evaluator::WinOddsRange { .. } => &[RuleKind::WinOddsLow, RuleKind::WinOddsHigh],
            Evaluator::RateOfChange { .. } => &[RuleKind::OddsChange],
            Evaluator::PayoutRange { .. } => &[RuleKind::ExactaLow, RuleKind::ExactaHigh],
        }
    }

    /// Evaluate `current` (and `previous`, where relevant) in `context`
    pub fn evaluate(
        &self,
        current: Option<f64>,
        previous: Option<f64>,
        context: &AlertContext,
    ) -> Option<AlertCandidate> {
        let current = current.filter(|v| v.is_finite())?;

        match *self {
            Evaluator::WinOddsRange { min, max } => {
                let (rule, threshold, verb) = if current < min {
                    (RuleKind::WinOddsLow, min, "dropped to")
                } else if current > max {
                    (RuleKind::WinOddsHigh, max, "rose to")
                } else {
                    return None;
                };

                Some(candidate(
                    rule,
                    format!(
                        "{} ({}) odds {} {:.1} at {}",
                        context.label, context.key.subject, verb, current, context.key.source
                    ),
                    threshold,
                    current,
                    context,
                ))
            }
            Evaluator::RateOfChange { min_change_percent } => {
                let previous = previous.filter(|v| v.is_finite() && *v > 0.0)?;
                let change_percent = (current - previous).abs() / previous * 100.0;
                if change_percent < min_change_percent {
                    return None;
                }

                let direction = if current > previous { "increased" } else { "decreased" };
                Some(candidate(
                    RuleKind::OddsChange,
                    format!(
                        "{} odds {} by {:.1}% (from {:.1} to {:.1})",
                        context.label, direction, change_percent, previous, current
                    ),
                    min_change_percent,
                    change_percent,
                    context,
                ))
            }
            Evaluator::PayoutRange { min, max } => {
                let (rule, threshold, level) = if current < min {
                    (RuleKind::ExactaLow, min, "Low")
                } else if current > max {
                    (RuleKind::ExactaHigh, max, "High")
                } else {
                    return None;
                };

                Some(candidate(
                    rule,
                    format!(
                        "{} exacta payout ${:.2} for {} at {}",
                        level, current, context.key.subject, context.key.source
                    ),
                    threshold,
                    current,
                    context,
                ))
            }
        }
    }
}

fn candidate(
    rule: RuleKind,
    message: String,
    threshold_value: f64,
    actual_value: f64,
    context: &AlertContext,
) -> AlertCandidate {
    AlertCandidate {
        rule,
        message,
        threshold_value,
        actual_value,
        context: context.clone(),
    }
}

/// The enabled evaluators, built once from configuration
#[derive(Debug, Clone, Default)]
pub struct EvaluatorCatalog {
    evaluators: Vec<Evaluator>,
}

impl EvaluatorCatalog {
    /// Build the catalog; inverted or non-positive thresholds disable only their evaluator
    pub fn from_config(config: &AlertingConfig) -> Self {
        let mut evaluators = Vec::with_capacity(3);

        let win = config.win_odds;
        if win.min < win.max {
            evaluators.push(Evaluator::WinOddsRange {
                min: win.min,
                max: win.max,
            });
        } else {
            warn!(min = win.min, max = win.max, "Win odds range is inverted; evaluator disabled");
        }

        if config.rate_of_change_percent > 0.0 {
            evaluators.push(Evaluator::RateOfChange {
                min_change_percent: config.rate_of_change_percent,
            });
        } else {
            warn!(
                percent = config.rate_of_change_percent,
                "Rate of change threshold is not positive; evaluator disabled"
            );
        }

        let exacta = config.exacta;
        if exacta.min < exacta.max {
            evaluators.push(Evaluator::PayoutRange {
                min: exacta.min,
                max: exacta.max,
            });
        } else {
            warn!(
                min = exacta.min,
                max = exacta.max,
                "Exacta payout range is inverted; evaluator disabled"
            );
        }

        Self { evaluators }
    }

    /// Catalog with an explicit evaluator list
    pub fn new(evaluators: Vec<Evaluator>) -> Self {
        Self { evaluators }
    }

    /// Enabled evaluators applying to `target`
    pub fn for_target(&self, target: Target) -> impl Iterator<Item = &Evaluator> {
        self.evaluators.iter().filter(move |e| e.target() == target)
    }

    /// Every enabled evaluator
    pub fn evaluators(&self) -> &[Evaluator] {
        &self.evaluators
    }
}
