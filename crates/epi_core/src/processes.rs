//! Declarative rule vocabulary and its desugaring into rate-structure terms.
//!
//! Every rule kind lowers to a list of [`Term`]s that address the constant
//! influx vector `b`, the linear rate matrix `L` or the quadratic rate tensor `Q`
//! by compartment label. Lowering never inspects rate values beyond negating
//! them, so it is shared by numeric models and by any rate type implementing
//! [`RateValue`].

use crate::traits::RateValue;
use serde::{Deserialize, Serialize};

/// A single contribution to one cell of a rate structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Term<'a, R> {
    /// `b[target] += rate`
    Constant { target: &'a str, rate: R },
    /// `L[row][col] += rate`
    Linear { row: &'a str, col: &'a str, rate: R },
    /// `Q[target][agent1][agent2] += rate`
    Quadratic {
        target: &'a str,
        agent1: &'a str,
        agent2: &'a str,
        rate: R,
    },
}

impl<R> Term<'_, R> {
    pub fn rate(&self) -> &R {
        match self {
            Term::Constant { rate, .. } | Term::Linear { rate, .. } | Term::Quadratic { rate, .. } => {
                rate
            }
        }
    }
}

/// A declarative process acting on compartments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Process<R = f64> {
    /// Per-capita flow `source -> target`.
    Transition {
        source: String,
        rate: R,
        target: String,
    },
    /// Constant influx into `target`, independent of the state.
    Birth { rate: R, target: String },
    /// Per-capita outflow from `source` that leaves the system.
    Death { source: String, rate: R },
    /// `source -> product1 + product2` at a per-capita rate.
    Fission {
        source: String,
        rate: R,
        product1: String,
        product2: String,
    },
    /// `agent1 + agent2 -> product` at `rate * x_agent1 * x_agent2`.
    Fusion {
        agent1: String,
        agent2: String,
        rate: R,
        product: String,
    },
    /// `coupling1 + coupling2 -> affected1 + affected2` at
    /// `rate * x_coupling1 * x_coupling2`. Members present on both sides cancel.
    Transmission {
        coupling1: String,
        coupling2: String,
        rate: R,
        affected1: String,
        affected2: String,
    },
    /// Raw linear cell update `L[row][col] += rate`.
    LinearCell { row: String, col: String, rate: R },
    /// Raw quadratic cell update `Q[target][agent1][agent2] += rate`.
    Quadratic {
        agent1: String,
        agent2: String,
        target: String,
        rate: R,
    },
}

impl<R> Process<R> {
    pub fn transition(source: impl Into<String>, rate: R, target: impl Into<String>) -> Self {
        Process::Transition {
            source: source.into(),
            rate,
            target: target.into(),
        }
    }

    pub fn birth(rate: R, target: impl Into<String>) -> Self {
        Process::Birth {
            rate,
            target: target.into(),
        }
    }

    pub fn death(source: impl Into<String>, rate: R) -> Self {
        Process::Death {
            source: source.into(),
            rate,
        }
    }

    pub fn fission(
        source: impl Into<String>,
        rate: R,
        product1: impl Into<String>,
        product2: impl Into<String>,
    ) -> Self {
        Process::Fission {
            source: source.into(),
            rate,
            product1: product1.into(),
            product2: product2.into(),
        }
    }

    pub fn fusion(
        agent1: impl Into<String>,
        agent2: impl Into<String>,
        rate: R,
        product: impl Into<String>,
    ) -> Self {
        Process::Fusion {
            agent1: agent1.into(),
            agent2: agent2.into(),
            rate,
            product: product.into(),
        }
    }

    pub fn transmission(
        coupling1: impl Into<String>,
        coupling2: impl Into<String>,
        rate: R,
        affected1: impl Into<String>,
        affected2: impl Into<String>,
    ) -> Self {
        Process::Transmission {
            coupling1: coupling1.into(),
            coupling2: coupling2.into(),
            rate,
            affected1: affected1.into(),
            affected2: affected2.into(),
        }
    }

    pub fn linear_cell(row: impl Into<String>, col: impl Into<String>, rate: R) -> Self {
        Process::LinearCell {
            row: row.into(),
            col: col.into(),
            rate,
        }
    }

    pub fn quadratic(
        agent1: impl Into<String>,
        agent2: impl Into<String>,
        target: impl Into<String>,
        rate: R,
    ) -> Self {
        Process::Quadratic {
            agent1: agent1.into(),
            agent2: agent2.into(),
            target: target.into(),
            rate,
        }
    }

    pub fn rate(&self) -> &R {
        match self {
            Process::Transition { rate, .. }
            | Process::Birth { rate, .. }
            | Process::Death { rate, .. }
            | Process::Fission { rate, .. }
            | Process::Fusion { rate, .. }
            | Process::Transmission { rate, .. }
            | Process::LinearCell { rate, .. }
            | Process::Quadratic { rate, .. } => rate,
        }
    }

    /// Short name used in logs and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            Process::Transition { .. } => "transition",
            Process::Birth { .. } => "birth",
            Process::Death { .. } => "death",
            Process::Fission { .. } => "fission",
            Process::Fusion { .. } => "fusion",
            Process::Transmission { .. } => "transmission",
            Process::LinearCell { .. } => "linear rate",
            Process::Quadratic { .. } => "quadratic rate",
        }
    }

    /// Whether this process only touches the quadratic tensor.
    pub fn is_quadratic(&self) -> bool {
        matches!(
            self,
            Process::Fusion { .. } | Process::Transmission { .. } | Process::Quadratic { .. }
        )
    }
}

impl<R: RateValue> Process<R> {
    /// Lowers the process into rate-structure terms.
    pub fn desugar(&self) -> Vec<Term<'_, R>> {
        match self {
            Process::Transition {
                source,
                rate,
                target,
            } => vec![
                Term::Linear {
                    row: target,
                    col: source,
                    rate: rate.clone(),
                },
                Term::Linear {
                    row: source,
                    col: source,
                    rate: -rate.clone(),
                },
            ],
            Process::Birth { rate, target } => vec![Term::Constant {
                target,
                rate: rate.clone(),
            }],
            Process::Death { source, rate } => vec![Term::Linear {
                row: source,
                col: source,
                rate: -rate.clone(),
            }],
            Process::Fission {
                source,
                rate,
                product1,
                product2,
            } => vec![
                Term::Linear {
                    row: product1,
                    col: source,
                    rate: rate.clone(),
                },
                Term::Linear {
                    row: product2,
                    col: source,
                    rate: rate.clone(),
                },
                Term::Linear {
                    row: source,
                    col: source,
                    rate: -rate.clone(),
                },
            ],
            Process::Fusion {
                agent1,
                agent2,
                rate,
                product,
            } => [
                (product.as_str(), rate.clone()),
                (agent1.as_str(), -rate.clone()),
                (agent2.as_str(), -rate.clone()),
            ]
            .into_iter()
            .map(|(target, rate)| Term::Quadratic {
                target,
                agent1,
                agent2,
                rate,
            })
            .collect(),
            Process::Transmission {
                coupling1,
                coupling2,
                rate,
                affected1,
                affected2,
            } => {
                let net = net_stoichiometry(
                    [coupling1.as_str(), coupling2.as_str()],
                    [affected1.as_str(), affected2.as_str()],
                );
                let mut terms = Vec::new();
                for (target, coefficient) in net {
                    let signed = if coefficient < 0 {
                        -rate.clone()
                    } else {
                        rate.clone()
                    };
                    for _ in 0..coefficient.unsigned_abs() {
                        terms.push(Term::Quadratic {
                            target,
                            agent1: coupling1,
                            agent2: coupling2,
                            rate: signed.clone(),
                        });
                    }
                }
                terms
            }
            Process::LinearCell { row, col, rate } => vec![Term::Linear {
                row,
                col,
                rate: rate.clone(),
            }],
            Process::Quadratic {
                agent1,
                agent2,
                target,
                rate,
            } => vec![Term::Quadratic {
                target,
                agent1,
                agent2,
                rate: rate.clone(),
            }],
        }
    }
}

/// Net change per compartment when `reactants` turn into `products`, in first-seen
/// order, omitting compartments whose count does not change.
fn net_stoichiometry<'a>(reactants: [&'a str; 2], products: [&'a str; 2]) -> Vec<(&'a str, i32)> {
    let mut net: Vec<(&str, i32)> = Vec::with_capacity(4);
    let mut bump = |label: &'a str, delta: i32| match net.iter_mut().find(|(l, _)| *l == label) {
        Some((_, count)) => *count += delta,
        None => net.push((label, delta)),
    };
    for label in reactants {
        bump(label, -1);
    }
    for label in products {
        bump(label, 1);
    }
    net.retain(|(_, count)| *count != 0);
    net
}

/// Rules accepted by `set_linear_rates`: either a transition or a raw cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinearRule<R = f64> {
    Transition {
        source: String,
        rate: R,
        target: String,
    },
    Cell { row: String, col: String, rate: R },
}

impl<R> From<LinearRule<R>> for Process<R> {
    fn from(rule: LinearRule<R>) -> Self {
        match rule {
            LinearRule::Transition {
                source,
                rate,
                target,
            } => Process::Transition {
                source,
                rate,
                target,
            },
            LinearRule::Cell { row, col, rate } => Process::LinearCell { row, col, rate },
        }
    }
}

impl<R> From<(&str, R, &str)> for LinearRule<R> {
    fn from((source, rate, target): (&str, R, &str)) -> Self {
        LinearRule::Transition {
            source: source.to_string(),
            rate,
            target: target.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_sum(terms: &[Term<'_, f64>], row: &str, col: &str) -> f64 {
        terms
            .iter()
            .filter_map(|term| match term {
                Term::Linear { row: r, col: c, rate } if *r == row && *c == col => Some(*rate),
                _ => None,
            })
            .sum()
    }

    fn quadratic_sum(terms: &[Term<'_, f64>], target: &str) -> f64 {
        terms
            .iter()
            .filter_map(|term| match term {
                Term::Quadratic { target: t, rate, .. } if *t == target => Some(*rate),
                _ => None,
            })
            .sum()
    }

    #[test]
    fn transition_lowers_to_conserving_pair() {
        let process = Process::transition("S", 0.5, "I");
        let terms = process.desugar();
        assert_eq!(terms.len(), 2);
        assert_eq!(linear_sum(&terms, "I", "S"), 0.5);
        assert_eq!(linear_sum(&terms, "S", "S"), -0.5);
    }

    #[test]
    fn fission_with_equal_products_doubles_inflow() {
        let process = Process::fission("A", 2.0, "B", "B");
        let terms = process.desugar();
        assert_eq!(linear_sum(&terms, "B", "A"), 4.0);
        assert_eq!(linear_sum(&terms, "A", "A"), -2.0);
    }

    #[test]
    fn fusion_consumes_both_agents() {
        let process = Process::fusion("A", "B", 3.0, "C");
        let terms = process.desugar();
        assert_eq!(quadratic_sum(&terms, "C"), 3.0);
        assert_eq!(quadratic_sum(&terms, "A"), -3.0);
        assert_eq!(quadratic_sum(&terms, "B"), -3.0);
        assert!(terms.iter().all(|term| matches!(
            term,
            Term::Quadratic {
                agent1: "A",
                agent2: "B",
                ..
            }
        )));
    }

    #[test]
    fn transmission_cancels_shared_members() {
        let process = Process::transmission("S", "I", 1.5, "I", "I");
        let terms = process.desugar();
        assert_eq!(terms.len(), 2);
        assert_eq!(quadratic_sum(&terms, "S"), -1.5);
        assert_eq!(quadratic_sum(&terms, "I"), 1.5);
    }

    #[test]
    fn transmission_without_net_change_emits_nothing() {
        let process = Process::transmission("A", "B", 1.0, "B", "A");
        assert!(process.desugar().is_empty());
    }

    #[test]
    fn linear_rule_from_tuple_is_transition() {
        let rule: LinearRule = ("E", 0.2, "I").into();
        let process: Process = rule.into();
        assert_eq!(process, Process::transition("E", 0.2, "I"));
        assert_eq!(process.kind(), "transition");
        assert!(!process.is_quadratic());
    }

    #[test]
    fn processes_round_trip_through_json() {
        let processes = vec![
            Process::transition("I", 1.0, "R"),
            Process::quadratic("S", "I", "S", -2.0),
        ];
        let text = serde_json::to_string(&processes).expect("serialize");
        let parsed: Vec<Process> = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(parsed, processes);
    }
}
