use crate::error::{EpiError, EpiResult};
use crate::processes::{LinearRule, Process, Term};
use crate::registry::CompartmentRegistry;
use crate::traits::RateValue;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::BTreeMap;
use tracing::debug;

/// Sparse quadratic rate tensor, `Q[k][i][j]` stored as nonzero `(k, i, j)` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadraticRates {
    dim: usize,
    entries: BTreeMap<(usize, usize, usize), f64>,
}

impl QuadraticRates {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// `Q[target][agent1][agent2]`, zero when never written.
    pub fn get(&self, target: usize, agent1: usize, agent2: usize) -> f64 {
        self.entries
            .get(&(target, agent1, agent2))
            .copied()
            .unwrap_or(0.0)
    }

    /// Number of stored cells.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored cells as `(target, agent1, agent2, rate)` in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, usize, f64)> + '_ {
        self.entries
            .iter()
            .map(|(&(k, i, j), &rate)| (k, i, j, rate))
    }

    /// Dense `N x N` matrix of rates contributing to compartment `target`.
    pub fn slice(&self, target: usize) -> DMatrix<f64> {
        let mut matrix = DMatrix::zeros(self.dim, self.dim);
        for (&(_, i, j), &rate) in self
            .entries
            .range((target, 0, 0)..(target + 1, 0, 0))
        {
            matrix[(i, j)] = rate;
        }
        matrix
    }

    /// Row `k` of the result holds the cells of `Q[k]` at column `i * N + j`.
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(self.dim, self.dim * self.dim);
        for (&(k, i, j), &rate) in &self.entries {
            if rate != 0.0 {
                coo.push(k, i * self.dim + j, rate);
            }
        }
        CsrMatrix::from(&coo)
    }

    fn add(&mut self, target: usize, agent1: usize, agent2: usize, rate: f64) {
        *self.entries.entry((target, agent1, agent2)).or_insert(0.0) += rate;
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn clear_target(&mut self, target: usize) {
        self.entries.retain(|&(k, _, _), _| k != target);
    }

    fn grow(&mut self, dim: usize) {
        self.dim = dim;
    }
}

/// Which rate structures to zero before a rule list is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reset {
    pub linear: bool,
    pub quadratic: bool,
    pub constant: bool,
}

impl Reset {
    pub const NONE: Reset = Reset {
        linear: false,
        quadratic: false,
        constant: false,
    };
    pub const ALL: Reset = Reset {
        linear: true,
        quadratic: true,
        constant: true,
    };

    pub fn linear(enabled: bool) -> Self {
        Reset {
            linear: enabled,
            ..Reset::NONE
        }
    }

    pub fn quadratic(enabled: bool) -> Self {
        Reset {
            quadratic: enabled,
            ..Reset::NONE
        }
    }

    pub fn constant(enabled: bool) -> Self {
        Reset {
            constant: enabled,
            ..Reset::NONE
        }
    }
}

enum IndexedTerm {
    Constant(usize, f64),
    Linear(usize, usize, f64),
    Quadratic(usize, usize, usize, f64),
}

/// Owns the compartment registry together with the constant influx `b`, the
/// linear rate matrix `L` and the quadratic rate tensor `Q`.
///
/// All mutation goes through `&mut self`; any number of readers may share a
/// `&RateModel` across threads while nobody holds it mutably. Cloning deep-copies
/// every rate structure.
#[derive(Debug, Clone, PartialEq)]
pub struct RateModel {
    registry: CompartmentRegistry,
    constant: DVector<f64>,
    linear: DMatrix<f64>,
    quadratic: QuadraticRates,
}

impl RateModel {
    pub fn new(registry: CompartmentRegistry) -> Self {
        let n = registry.len();
        Self {
            registry,
            constant: DVector::zeros(n),
            linear: DMatrix::zeros(n, n),
            quadratic: QuadraticRates::new(n),
        }
    }

    pub fn from_labels<I, S>(labels: I) -> EpiResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::new(CompartmentRegistry::from_labels(labels)?))
    }

    pub fn dimension(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &CompartmentRegistry {
        &self.registry
    }

    pub fn compartments(&self) -> &[String] {
        self.registry.labels()
    }

    pub fn compartment(&self, index: usize) -> EpiResult<&str> {
        self.registry.label_of(index)
    }

    pub fn index_of(&self, label: &str) -> EpiResult<usize> {
        self.registry.index_of(label)
    }

    pub fn linear_rates(&self) -> &DMatrix<f64> {
        &self.linear
    }

    pub fn quadratic_rates(&self) -> &QuadraticRates {
        &self.quadratic
    }

    pub fn constant_rates(&self) -> &DVector<f64> {
        &self.constant
    }

    /// Appends a compartment, growing every rate structure by one row/column.
    /// Existing indices and entries are preserved.
    pub fn add_compartment(&mut self, label: impl Into<String>) -> EpiResult<usize> {
        let n = self.dimension();
        let index = self.registry.add(label)?;

        let mut linear = DMatrix::zeros(n + 1, n + 1);
        linear.view_mut((0, 0), (n, n)).copy_from(&self.linear);
        self.linear = linear;

        let mut constant = DVector::zeros(n + 1);
        constant.rows_mut(0, n).copy_from(&self.constant);
        self.constant = constant;

        self.quadratic.grow(n + 1);
        debug!(index, dimension = n + 1, "added compartment");
        Ok(index)
    }

    /// Applies a mixed rule list atomically: every rule is validated and every label
    /// resolved before the first write.
    pub fn apply_processes(&mut self, processes: &[Process<f64>], reset: Reset) -> EpiResult<()> {
        let resolved = self.resolve(processes)?;

        if reset.linear {
            self.linear.fill(0.0);
        }
        if reset.quadratic {
            self.quadratic.clear();
        }
        if reset.constant {
            self.constant.fill(0.0);
        }

        for term in &resolved {
            match *term {
                IndexedTerm::Constant(k, rate) => self.constant[k] += rate,
                IndexedTerm::Linear(row, col, rate) => self.linear[(row, col)] += rate,
                IndexedTerm::Quadratic(k, i, j, rate) => self.quadratic.add(k, i, j, rate),
            }
        }

        debug!(
            processes = processes.len(),
            terms = resolved.len(),
            ?reset,
            "applied rate rules"
        );
        Ok(())
    }

    /// Transitions and raw linear cells; `reset` zeroes `L` first.
    pub fn set_linear_rates<I, T>(&mut self, rules: I, reset: bool) -> EpiResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<LinearRule<f64>>,
    {
        let processes: Vec<Process> = rules
            .into_iter()
            .map(|rule| Process::from(rule.into()))
            .collect();
        self.apply_processes(&processes, Reset::linear(reset))
    }

    /// `(agent1, agent2, target, rate)` cells; `reset` zeroes `Q` first.
    pub fn set_quadratic_rates<'a, I>(&mut self, rules: I, reset: bool) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str, f64)>,
    {
        let processes: Vec<Process> = rules
            .into_iter()
            .map(|(a1, a2, target, rate)| Process::quadratic(a1, a2, target, rate))
            .collect();
        self.apply_processes(&processes, Reset::quadratic(reset))
    }

    /// `(target, rate)` constant influx terms; `reset` zeroes `b` first.
    pub fn set_constant_rates<'a, I>(&mut self, rules: I, reset: bool) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let processes: Vec<Process> = rules
            .into_iter()
            .map(|(target, rate)| Process::birth(rate, target))
            .collect();
        self.apply_processes(&processes, Reset::constant(reset))
    }

    /// Replaces `L` wholesale.
    pub fn set_linear_matrix(&mut self, matrix: DMatrix<f64>) -> EpiResult<()> {
        let n = self.dimension();
        if matrix.shape() != (n, n) {
            return Err(EpiError::shape(
                "linear rate matrix",
                format!("{n}x{n}"),
                format!("{}x{}", matrix.nrows(), matrix.ncols()),
            ));
        }
        if let Some(bad) = matrix.iter().find(|v| !v.is_finite()) {
            return Err(EpiError::InvalidRate {
                value: *bad,
                context: "linear rate matrix".to_string(),
            });
        }
        self.linear = matrix;
        Ok(())
    }

    /// Replaces the `N x N` slice `Q[target]` wholesale.
    pub fn set_quadratic_matrix(&mut self, target: &str, matrix: &DMatrix<f64>) -> EpiResult<()> {
        let k = self.registry.index_of(target)?;
        let n = self.dimension();
        if matrix.shape() != (n, n) {
            return Err(EpiError::shape(
                "quadratic rate slice",
                format!("{n}x{n}"),
                format!("{}x{}", matrix.nrows(), matrix.ncols()),
            ));
        }
        if let Some(bad) = matrix.iter().find(|v| !v.is_finite()) {
            return Err(EpiError::InvalidRate {
                value: *bad,
                context: format!("quadratic rate slice for {target}"),
            });
        }
        self.quadratic.clear_target(k);
        for i in 0..n {
            for j in 0..n {
                let rate = matrix[(i, j)];
                if rate != 0.0 {
                    self.quadratic.add(k, i, j, rate);
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, processes: &[Process<f64>]) -> EpiResult<Vec<IndexedTerm>> {
        let mut resolved = Vec::with_capacity(processes.len() * 2);
        for process in processes {
            check_rate(process)?;
            for term in process.desugar() {
                resolved.push(self.resolve_term(&term)?);
            }
        }
        Ok(resolved)
    }

    fn resolve_term(&self, term: &Term<'_, f64>) -> EpiResult<IndexedTerm> {
        let index = |label: &str| self.registry.index_of(label);
        Ok(match *term {
            Term::Constant { target, rate } => IndexedTerm::Constant(index(target)?, rate),
            Term::Linear { row, col, rate } => IndexedTerm::Linear(index(row)?, index(col)?, rate),
            Term::Quadratic {
                target,
                agent1,
                agent2,
                rate,
            } => IndexedTerm::Quadratic(index(target)?, index(agent1)?, index(agent2)?, rate),
        })
    }
}

fn check_rate(process: &Process<f64>) -> EpiResult<()> {
    let rate = *process.rate();
    if rate.is_admissible() {
        Ok(())
    } else {
        Err(EpiError::InvalidRate {
            value: rate,
            context: format!("{} process", process.kind()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sir() -> RateModel {
        RateModel::from_labels(["S", "I", "R"]).expect("model")
    }

    fn column_sum(matrix: &DMatrix<f64>, col: usize) -> f64 {
        matrix.column(col).sum()
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: EpiResult<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn transition_conserves_column_sum() {
        let mut model = sir();
        model
            .set_linear_rates([("S", 0.7, "R")], false)
            .expect("rules apply");
        let l = model.linear_rates();
        assert_eq!(l[(2, 0)], 0.7);
        assert_eq!(l[(0, 0)], -0.7);
        assert_eq!(column_sum(l, 0), 0.0);
        assert_eq!(l.iter().filter(|v| **v != 0.0).count(), 2);
    }

    #[test]
    fn linear_reset_discards_previous_rules() {
        let mut model = sir();
        model
            .set_linear_rates([("I", 1.0, "R")], false)
            .expect("first");
        model
            .set_linear_rates([("S", 2.0, "I")], true)
            .expect("second");
        let l = model.linear_rates();
        assert_eq!(l[(2, 1)], 0.0);
        assert_eq!(l[(1, 1)], 0.0);
        assert_eq!(l[(1, 0)], 2.0);
    }

    #[test]
    fn raw_linear_cells_need_not_conserve() {
        let mut model = sir();
        let rule = LinearRule::Cell {
            row: "I".to_string(),
            col: "I".to_string(),
            rate: 0.3,
        };
        model.set_linear_rates([rule], false).expect("cell");
        assert_eq!(model.linear_rates()[(1, 1)], 0.3);
        assert_eq!(column_sum(model.linear_rates(), 1), 0.3);
    }

    #[test]
    fn quadratic_rules_accumulate_or_reset() {
        let mut model = sir();
        let rules = [("S", "I", "I", 1.5)];
        model.set_quadratic_rates(rules, false).expect("first");
        model.set_quadratic_rates(rules, false).expect("second");
        assert_eq!(model.quadratic_rates().get(1, 0, 1), 3.0);

        model
            .set_quadratic_rates([("S", "I", "I", 0.25)], true)
            .expect("reset");
        assert_eq!(model.quadratic_rates().get(1, 0, 1), 0.25);
        assert_eq!(model.quadratic_rates().nnz(), 1);
    }

    #[test]
    fn quadratic_slice_exposes_target_matrix() {
        let mut model = sir();
        model
            .set_quadratic_rates([("S", "I", "S", -2.0), ("S", "I", "I", 2.0)], false)
            .expect("rules");
        let s_slice = model.quadratic_rates().slice(0);
        assert_eq!(s_slice[(0, 1)], -2.0);
        assert_eq!(s_slice.iter().filter(|v| **v != 0.0).count(), 1);
        assert_eq!(model.quadratic_rates().slice(2).sum(), 0.0);
    }

    #[test]
    fn unknown_label_aborts_without_mutation() {
        let mut model = sir();
        model
            .set_linear_rates([("I", 1.0, "R")], false)
            .expect("baseline");
        let before = model.clone();
        let result = model.set_linear_rates([("S", 1.0, "I"), ("I", 1.0, "Z")], true);
        assert_err_contains(result, "Unknown compartment: Z");
        assert_eq!(model, before);
    }

    #[test]
    fn non_finite_rate_is_rejected() {
        let mut model = sir();
        assert_err_contains(
            model.set_linear_rates([("S", f64::NAN, "I")], false),
            "transition process",
        );
        assert_err_contains(
            model.set_quadratic_rates([("S", "I", "I", f64::INFINITY)], false),
            "quadratic rate process",
        );
        assert_eq!(model, sir());
    }

    #[test]
    fn negative_rates_reverse_the_flow() {
        let mut model = sir();
        model
            .set_linear_rates([("S", -1.0, "I")], false)
            .expect("negative rate");
        assert_eq!(model.linear_rates()[(1, 0)], -1.0);
        assert_eq!(model.linear_rates()[(0, 0)], 1.0);
    }

    #[test]
    fn fusion_and_births_write_expected_cells() {
        let mut model = RateModel::from_labels(["A", "B", "C"]).expect("model");
        model
            .apply_processes(
                &[Process::fusion("A", "B", 0.5, "C"), Process::birth(0.1, "A")],
                Reset::NONE,
            )
            .expect("apply");
        let q = model.quadratic_rates();
        assert_eq!(q.get(2, 0, 1), 0.5);
        assert_eq!(q.get(0, 0, 1), -0.5);
        assert_eq!(q.get(1, 0, 1), -0.5);
        assert_eq!(model.constant_rates()[0], 0.1);
    }

    #[test]
    fn add_compartment_preserves_entries() {
        let mut model = sir();
        model
            .set_linear_rates([("I", 1.0, "R")], false)
            .expect("linear");
        model
            .set_quadratic_rates([("S", "I", "I", 2.0)], false)
            .expect("quadratic");
        let index = model.add_compartment("V").expect("grow");
        assert_eq!(index, 3);
        assert_eq!(model.linear_rates().shape(), (4, 4));
        assert_eq!(model.linear_rates()[(2, 1)], 1.0);
        assert_eq!(model.quadratic_rates().dimension(), 4);
        assert_eq!(model.quadratic_rates().get(1, 0, 1), 2.0);
        assert_eq!(model.constant_rates().len(), 4);
        model
            .set_linear_rates([("S", 0.1, "V")], false)
            .expect("new label resolves");
        assert_eq!(model.linear_rates()[(3, 0)], 0.1);
    }

    #[test]
    fn raw_matrix_assignment_checks_shape() {
        let mut model = sir();
        assert_err_contains(
            model.set_linear_matrix(DMatrix::zeros(2, 3)),
            "expected 3x3, got 2x3",
        );
        assert_err_contains(
            model.set_quadratic_matrix("S", &DMatrix::zeros(4, 4)),
            "quadratic rate slice",
        );

        let mut slice = DMatrix::zeros(3, 3);
        slice[(0, 1)] = -1.0;
        model.set_quadratic_matrix("S", &slice).expect("slice");
        assert_eq!(model.quadratic_rates().get(0, 0, 1), -1.0);
        assert_eq!(model.quadratic_rates().nnz(), 1);
    }

    #[test]
    fn csr_layout_flattens_agent_pairs() {
        let mut model = sir();
        model
            .set_quadratic_rates([("S", "I", "S", -1.0), ("I", "R", "R", 4.0)], false)
            .expect("rules");
        let csr = model.quadratic_rates().to_csr();
        assert_eq!(csr.nrows(), 3);
        assert_eq!(csr.ncols(), 9);
        assert_eq!(csr.nnz(), 2);
        let row = csr.row(2);
        assert_eq!(row.col_indices(), &[5]);
        assert_eq!(row.values(), &[4.0]);
    }

    proptest! {
        #[test]
        fn transitions_always_conserve_columns(
            rules in prop::collection::vec((0usize..4, -5.0f64..5.0, 0usize..4), 0..20)
        ) {
            let labels = ["A", "B", "C", "D"];
            let mut model = RateModel::from_labels(labels).expect("model");
            let tuples: Vec<_> = rules
                .iter()
                .map(|&(s, r, t)| (labels[s], r, labels[t]))
                .collect();
            model.set_linear_rates(tuples, false).expect("rules");
            for col in 0..4 {
                prop_assert!(column_sum(model.linear_rates(), col).abs() < 1e-9);
            }
        }
    }
}
