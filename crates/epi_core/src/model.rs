use crate::analysis::{self, ComplexNumber};
use crate::error::{EpiError, EpiResult};
use crate::field::VectorField;
use crate::integrate::{integrate, IntegrationSettings};
use crate::processes::{LinearRule, Process};
use crate::rates::{QuadraticRates, RateModel, Reset};
use crate::trajectory::Trajectory;
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use tracing::debug;

/// Initial state, either aligned to compartment order or keyed by label.
/// Compartments missing from a label map start at zero.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialConditions {
    Vector(Vec<f64>),
    ByLabel(Vec<(String, f64)>),
}

impl From<Vec<f64>> for InitialConditions {
    fn from(values: Vec<f64>) -> Self {
        InitialConditions::Vector(values)
    }
}

impl From<&[f64]> for InitialConditions {
    fn from(values: &[f64]) -> Self {
        InitialConditions::Vector(values.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for InitialConditions {
    fn from(values: [f64; N]) -> Self {
        InitialConditions::Vector(values.to_vec())
    }
}

impl From<Vec<(&str, f64)>> for InitialConditions {
    fn from(pairs: Vec<(&str, f64)>) -> Self {
        InitialConditions::ByLabel(
            pairs
                .into_iter()
                .map(|(label, value)| (label.to_string(), value))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, f64); N]> for InitialConditions {
    fn from(pairs: [(&str, f64); N]) -> Self {
        Vec::from(pairs).into()
    }
}

impl From<HashMap<String, f64>> for InitialConditions {
    fn from(map: HashMap<String, f64>) -> Self {
        InitialConditions::ByLabel(map.into_iter().collect())
    }
}

/// Deterministic compartmental model: compartments, declarative rate rules and
/// the integration settings used to simulate them.
///
/// Rule setters mutate the model in place; `simulate` compiles a
/// [`VectorField`] snapshot, so rules may be changed between runs.
#[derive(Debug, Clone)]
pub struct DeterministicEpiModel {
    rates: RateModel,
    population_size: f64,
    settings: IntegrationSettings,
    initial_state: Option<Vec<f64>>,
}

impl DeterministicEpiModel {
    pub fn new<I, S>(compartments: I, population_size: f64) -> EpiResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !(population_size.is_finite() && population_size > 0.0) {
            return Err(EpiError::invalid(format!(
                "population_size must be positive and finite, got {population_size}"
            )));
        }
        let rates = RateModel::from_labels(compartments)?;
        if rates.dimension() == 0 {
            return Err(EpiError::invalid("a model needs at least one compartment"));
        }
        debug!(
            compartments = rates.dimension(),
            population_size, "created model"
        );
        Ok(Self {
            rates,
            population_size,
            settings: IntegrationSettings::default(),
            initial_state: None,
        })
    }

    pub fn with_settings(mut self, settings: IntegrationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &IntegrationSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut IntegrationSettings {
        &mut self.settings
    }

    pub fn population_size(&self) -> f64 {
        self.population_size
    }

    pub fn dimension(&self) -> usize {
        self.rates.dimension()
    }

    pub fn compartments(&self) -> &[String] {
        self.rates.compartments()
    }

    pub fn compartment(&self, index: usize) -> EpiResult<&str> {
        self.rates.compartment(index)
    }

    pub fn index_of(&self, label: &str) -> EpiResult<usize> {
        self.rates.index_of(label)
    }

    pub fn rates(&self) -> &RateModel {
        &self.rates
    }

    pub fn linear_rates(&self) -> &DMatrix<f64> {
        self.rates.linear_rates()
    }

    pub fn quadratic_rates(&self) -> &QuadraticRates {
        self.rates.quadratic_rates()
    }

    pub fn constant_rates(&self) -> &DVector<f64> {
        self.rates.constant_rates()
    }

    /// Appends a compartment. A stored initial state grows with a zero entry.
    pub fn add_compartment(&mut self, label: impl Into<String>) -> EpiResult<usize> {
        let index = self.rates.add_compartment(label)?;
        if let Some(state) = self.initial_state.as_mut() {
            state.push(0.0);
        }
        Ok(index)
    }

    pub fn set_linear_rates<I, T>(&mut self, rules: I, reset: bool) -> EpiResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<LinearRule<f64>>,
    {
        self.rates.set_linear_rates(rules, reset)
    }

    pub fn add_linear_rates<I, T>(&mut self, rules: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<LinearRule<f64>>,
    {
        self.rates.set_linear_rates(rules, false)
    }

    /// `(agent1, agent2, target, rate)`.
    pub fn set_quadratic_rates<'a, I>(&mut self, rules: I, reset: bool) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str, f64)>,
    {
        self.rates.set_quadratic_rates(rules, reset)
    }

    pub fn add_quadratic_rates<'a, I>(&mut self, rules: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str, f64)>,
    {
        self.rates.set_quadratic_rates(rules, false)
    }

    /// `(target, rate)` constant influx.
    pub fn set_constant_rates<'a, I>(&mut self, rules: I, reset: bool) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        self.rates.set_constant_rates(rules, reset)
    }

    /// `(source, rate, target)`; always accumulates.
    pub fn add_transition_processes<'a, I>(&mut self, processes: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, f64, &'a str)>,
    {
        let processes: Vec<Process> = processes
            .into_iter()
            .map(|(source, rate, target)| Process::transition(source, rate, target))
            .collect();
        self.add_processes(&processes)
    }

    /// `(agent1, agent2, rate, product)`.
    pub fn add_fusion_processes<'a, I>(&mut self, processes: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str, f64, &'a str)>,
    {
        let processes: Vec<Process> = processes
            .into_iter()
            .map(|(a1, a2, rate, product)| Process::fusion(a1, a2, rate, product))
            .collect();
        self.add_processes(&processes)
    }

    /// `(source, rate, product1, product2)`.
    pub fn add_fission_processes<'a, I>(&mut self, processes: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, f64, &'a str, &'a str)>,
    {
        let processes: Vec<Process> = processes
            .into_iter()
            .map(|(source, rate, p1, p2)| Process::fission(source, rate, p1, p2))
            .collect();
        self.add_processes(&processes)
    }

    /// `(coupling1, coupling2, rate, affected1, affected2)`.
    pub fn add_transmission_processes<'a, I>(&mut self, processes: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str, f64, &'a str, &'a str)>,
    {
        let processes: Vec<Process> = processes
            .into_iter()
            .map(|(c1, c2, rate, a1, a2)| Process::transmission(c1, c2, rate, a1, a2))
            .collect();
        self.add_processes(&processes)
    }

    /// `(rate, target)` constant influx.
    pub fn add_birth_processes<'a, I>(&mut self, processes: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = (f64, &'a str)>,
    {
        let processes: Vec<Process> = processes
            .into_iter()
            .map(|(rate, target)| Process::birth(rate, target))
            .collect();
        self.add_processes(&processes)
    }

    /// `(source, rate)` per-capita removal.
    pub fn add_death_processes<'a, I>(&mut self, processes: I) -> EpiResult<()>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let processes: Vec<Process> = processes
            .into_iter()
            .map(|(source, rate)| Process::death(source, rate))
            .collect();
        self.add_processes(&processes)
    }

    pub fn add_processes(&mut self, processes: &[Process]) -> EpiResult<()> {
        self.rates.apply_processes(processes, Reset::NONE)
    }

    /// Applies a mixed rule list; with `reset` every rate structure is cleared first.
    pub fn set_processes(&mut self, processes: &[Process], reset: bool) -> EpiResult<()> {
        let reset = if reset { Reset::ALL } else { Reset::NONE };
        self.rates.apply_processes(processes, reset)
    }

    pub fn set_linear_matrix(&mut self, matrix: DMatrix<f64>) -> EpiResult<()> {
        self.rates.set_linear_matrix(matrix)
    }

    pub fn set_quadratic_matrix(&mut self, target: &str, matrix: &DMatrix<f64>) -> EpiResult<()> {
        self.rates.set_quadratic_matrix(target, matrix)
    }

    pub fn vector_field(&self) -> VectorField {
        VectorField::new(&self.rates)
    }

    pub fn dxdt(&self, state: &[f64]) -> EpiResult<Vec<f64>> {
        self.vector_field().evaluate(state)
    }

    pub fn jacobian(&self, state: &[f64]) -> EpiResult<DMatrix<f64>> {
        self.vector_field().jacobian(state)
    }

    pub fn jacobian_leading_eigenvalue(&self, state: &[f64]) -> EpiResult<ComplexNumber> {
        analysis::leading_eigenvalue(&self.vector_field(), state)
    }

    /// Resolves `initial` into a state vector in compartment order.
    pub fn resolve_initial(&self, initial: &InitialConditions) -> EpiResult<Vec<f64>> {
        let n = self.dimension();
        match initial {
            InitialConditions::Vector(values) => {
                if values.len() != n {
                    return Err(EpiError::shape("initial conditions", n, values.len()));
                }
                Ok(values.clone())
            }
            InitialConditions::ByLabel(pairs) => {
                let mut state = vec![0.0; n];
                let mut seen = vec![false; n];
                for (label, value) in pairs {
                    let index = self.rates.index_of(label)?;
                    if seen[index] {
                        return Err(EpiError::invalid(format!(
                            "initial condition for {label} given twice"
                        )));
                    }
                    seen[index] = true;
                    state[index] = *value;
                }
                Ok(state)
            }
        }
    }

    /// Stores an initial state for [`integrate`](Self::integrate).
    pub fn set_initial_conditions(
        &mut self,
        initial: impl Into<InitialConditions>,
    ) -> EpiResult<()> {
        let state = self.resolve_initial(&initial.into())?;
        let total: f64 = state.iter().sum();
        if (total - self.population_size).abs() > 1e-9 * self.population_size.max(1.0) {
            debug!(
                total,
                population_size = self.population_size,
                "initial conditions do not sum to the population size"
            );
        }
        self.initial_state = Some(state);
        Ok(())
    }

    pub fn initial_conditions(&self) -> Option<&[f64]> {
        self.initial_state.as_deref()
    }

    /// Integrates from `initial` at `time_points[0]` and samples every time point.
    pub fn simulate(
        &self,
        initial: impl Into<InitialConditions>,
        time_points: &[f64],
    ) -> EpiResult<Trajectory> {
        let state = self.resolve_initial(&initial.into())?;
        self.run(&state, time_points)
    }

    /// Like [`simulate`](Self::simulate), starting from the stored initial conditions.
    pub fn integrate(&self, time_points: &[f64]) -> EpiResult<Trajectory> {
        let state = self
            .initial_state
            .as_deref()
            .ok_or_else(|| EpiError::invalid("initial conditions have not been set"))?;
        self.run(state, time_points)
    }

    fn run(&self, state: &[f64], time_points: &[f64]) -> EpiResult<Trajectory> {
        let field = self.vector_field();
        let trajectory = integrate(&field, state, time_points, &self.settings)?;
        Ok(trajectory.with_compartments(self.compartments().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate::IntegrationMethod;

    fn assert_err_contains<T: std::fmt::Debug>(result: EpiResult<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn seir() -> DeterministicEpiModel {
        let mut model = DeterministicEpiModel::new(["S", "E", "I", "R"], 1.0).expect("model");
        model
            .add_transition_processes([("E", 1.0, "I"), ("I", 1.0, "R")])
            .expect("transitions");
        model
            .set_quadratic_rates([("S", "I", "S", -1.0), ("S", "I", "E", 1.0)], false)
            .expect("quadratic");
        model
    }

    #[test]
    fn construction_validates_inputs() {
        let empty: [&str; 0] = [];
        assert_err_contains(DeterministicEpiModel::new(empty, 1.0), "at least one");
        assert_err_contains(DeterministicEpiModel::new(["S"], 0.0), "population_size");
        assert_err_contains(DeterministicEpiModel::new(["S"], f64::NAN), "population_size");
        assert!(matches!(
            DeterministicEpiModel::new(["S", "S"], 1.0),
            Err(EpiError::DuplicateCompartment { .. })
        ));
    }

    #[test]
    fn transitions_fill_linear_matrix() {
        let model = seir();
        let l = model.linear_rates();
        assert_eq!(l[(2, 1)], 1.0);
        assert_eq!(l[(1, 1)], -1.0);
        assert_eq!(l[(3, 2)], 1.0);
        assert_eq!(l[(2, 2)], -1.0);
        for col in 0..4 {
            assert_eq!(l.column(col).sum(), 0.0);
        }
        assert_eq!(model.quadratic_rates().get(1, 0, 2), 1.0);
        assert_eq!(model.compartment(1).expect("E"), "E");
    }

    #[test]
    fn label_initial_conditions_default_to_zero() {
        let model = seir();
        let state = model
            .resolve_initial(&[("I", 0.01), ("S", 0.99)].into())
            .expect("resolve");
        assert_eq!(state, vec![0.99, 0.0, 0.01, 0.0]);
        assert_err_contains(model.resolve_initial(&[("X", 1.0)].into()), "Unknown compartment: X");
        assert_err_contains(
            model.resolve_initial(&[("S", 0.5), ("S", 0.5)].into()),
            "given twice",
        );
        assert_err_contains(model.resolve_initial(&vec![1.0, 0.0].into()), "initial conditions");
    }

    #[test]
    fn simulate_returns_one_state_per_time_point() {
        let model = seir();
        let times: Vec<f64> = (0..=5).map(f64::from).collect();
        let trajectory = model
            .simulate([0.99, 0.0, 0.01, 0.0], &times)
            .expect("simulate");
        assert_eq!(trajectory.len(), times.len());
        assert_eq!(trajectory.times(), times.as_slice());
        assert_eq!(trajectory.state(0), Some(&[0.99, 0.0, 0.01, 0.0][..]));
        assert_eq!(trajectory.compartments(), model.compartments());
        for total in trajectory.totals() {
            assert!((total - 1.0).abs() < 1e-8);
        }
    }

    #[test]
    fn zero_state_stays_zero() {
        let model = seir();
        let trajectory = model
            .simulate(vec![0.0; 4], &[0.0, 1.0, 10.0])
            .expect("simulate");
        for state in trajectory.states() {
            assert!(state.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn stored_initial_conditions_drive_integrate() {
        let mut model = seir();
        assert_err_contains(model.integrate(&[0.0, 1.0]), "not been set");
        model
            .set_initial_conditions([("S", 0.9), ("I", 0.1)])
            .expect("initial conditions");
        let stored = model.integrate(&[0.0, 1.0]).expect("integrate");
        let direct = model
            .simulate([("S", 0.9), ("I", 0.1)], &[0.0, 1.0])
            .expect("simulate");
        assert_eq!(stored, direct);

        model.add_compartment("V").expect("grow");
        assert_eq!(model.initial_conditions(), Some(&[0.9, 0.0, 0.1, 0.0, 0.0][..]));
    }

    #[test]
    fn rules_can_change_between_runs() {
        let mut model = seir();
        let before = model
            .simulate([("S", 0.9), ("I", 0.1)], &[0.0, 2.0])
            .expect("first run");
        model
            .add_transition_processes([("S", 0.5, "R")])
            .expect("vaccination");
        let after = model
            .simulate([("S", 0.9), ("I", 0.1)], &[0.0, 2.0])
            .expect("second run");
        let s_before = before.series_by_label("S").expect("S")[1];
        let s_after = after.series_by_label("S").expect("S")[1];
        assert!(s_after < s_before);
    }

    #[test]
    fn set_processes_with_reset_replaces_everything() {
        let mut model = seir();
        model
            .set_processes(&[Process::birth(0.1, "S"), Process::death("S", 0.1)], true)
            .expect("reset");
        assert_eq!(model.quadratic_rates().nnz(), 0);
        assert_eq!(model.linear_rates()[(0, 0)], -0.1);
        assert_eq!(model.linear_rates()[(2, 1)], 0.0);
        assert_eq!(model.constant_rates()[0], 0.1);
        let dx = model.dxdt(&[1.0, 0.0, 0.0, 0.0]).expect("dxdt");
        assert!(dx.iter().all(|v| v.abs() < 1e-15));
    }

    #[test]
    fn fission_and_transmission_helpers() {
        let mut model = DeterministicEpiModel::new(["A", "B", "C"], 1.0).expect("model");
        model
            .add_fission_processes([("A", 1.0, "B", "C")])
            .expect("fission");
        model
            .add_transmission_processes([("B", "C", 2.0, "C", "C")])
            .expect("transmission");
        model
            .add_fusion_processes([("A", "B", 0.5, "C")])
            .expect("fusion");
        let q = model.quadratic_rates();
        assert_eq!(q.get(1, 1, 2), -2.0);
        assert_eq!(q.get(2, 1, 2), 2.0);
        assert_eq!(q.get(2, 0, 1), 0.5);
        assert_eq!(model.linear_rates()[(1, 0)], 1.0);
        assert_eq!(model.linear_rates()[(2, 0)], 1.0);
        assert_eq!(model.linear_rates()[(0, 0)], -1.0);
    }

    #[test]
    fn failed_rule_list_leaves_model_unchanged() {
        let mut model = seir();
        let before = model.rates().clone();
        assert!(model
            .add_transition_processes([("S", 1.0, "R"), ("Q", 1.0, "R")])
            .is_err());
        assert_eq!(model.rates(), &before);
    }

    #[test]
    fn fixed_step_settings_are_used() {
        let model = seir().with_settings(IntegrationSettings {
            method: IntegrationMethod::Rk4 { step: 0.5 },
            max_steps: 3,
            ..IntegrationSettings::default()
        });
        assert_err_contains(
            model.simulate([("S", 0.9), ("I", 0.1)], &[0.0, 10.0]),
            "step budget",
        );
    }

    #[test]
    fn concurrent_runs_share_one_model() {
        let model = seir();
        let times = [0.0, 1.0, 2.0];
        let expected = model
            .simulate([("S", 0.9), ("I", 0.1)], &times)
            .expect("reference run");
        let shared = &model;
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(move || shared.simulate([("S", 0.9), ("I", 0.1)], &times)))
                .collect();
            for handle in handles {
                let trajectory = handle
                    .join()
                    .expect("thread should not panic")
                    .expect("simulate");
                assert_eq!(trajectory, expected);
            }
        });
    }

    #[test]
    fn leading_eigenvalue_signals_outbreak() {
        let model = seir();
        let leading = model
            .jacobian_leading_eigenvalue(&[1.0, 0.0, 0.0, 0.0])
            .expect("eigenvalue");
        // E-I block [[-1, 1], [1, -1]] has eigenvalues 0 and -2.
        assert!(leading.re.abs() < 1e-9);
        let jac = model.jacobian(&[1.0, 0.0, 0.0, 0.0]).expect("jacobian");
        assert_eq!(jac[(1, 2)], 1.0);
    }
}
