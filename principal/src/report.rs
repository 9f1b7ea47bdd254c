use models::Machine;

use crate::constraints::ConstraintResult;

/// A machine paired with the ordered outcome of every constraint applied
/// to it.
#[derive(Debug, Clone)]
pub struct MachineEvaluation {
    pub machine: Machine,
    pub results: Vec<ConstraintResult>,
}

impl MachineEvaluation {
    pub fn is_eligible(&self) -> bool {
        self.results.iter().all(|r| r.satisfied)
    }

    pub fn failure_reasons(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.satisfied)
            .map(|r| r.reason.as_str())
            .collect()
    }
}

/// Per-machine aggregation of constraint outcomes for a single
/// scheduling decision, partitioned into eligible and ineligible.
#[derive(Debug, Clone)]
pub struct SchedulingReport {
    pub eligible: Vec<Machine>,
    pub ineligible: Vec<MachineEvaluation>,
}

impl SchedulingReport {
    pub fn from_evaluations(evaluations: Vec<MachineEvaluation>) -> Self {
        let mut eligible = Vec::new();
        let mut ineligible = Vec::new();
        for eval in evaluations {
            if eval.is_eligible() {
                eligible.push(eval.machine);
            } else {
                ineligible.push(eval);
            }
        }
        Self { eligible, ineligible }
    }

    /// One line per ineligible machine, semicolon-joined failure reasons,
    /// grouped by machine name (falling back to id when unnamed).
    pub fn error_text(&self) -> String {
        self.ineligible
            .iter()
            .map(|eval| {
                let name = eval.machine.name.as_deref().unwrap_or(&eval.machine.id);
                format!("  {name}: {}", eval.failure_reasons().join("; "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn summary(&self) -> String {
        format!(
            "{} eligible, {} ineligible",
            self.eligible.len(),
            self.ineligible.len()
        )
    }
}

impl std::fmt::Display for SchedulingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintType;

    #[test]
    fn summary_counts_both_sides() {
        let report = SchedulingReport {
            eligible: vec![Machine::new("m1", 1, 1)],
            ineligible: vec![MachineEvaluation {
                machine: Machine::new("m2", 1, 1),
                results: vec![ConstraintResult {
                    satisfied: false,
                    reason: "nope".into(),
                    constraint_type: ConstraintType::Placement,
                }],
            }],
        };
        assert_eq!(report.summary(), "1 eligible, 1 ineligible");
        assert_eq!(report.error_text(), "  m2: nope");
    }
}
