//! Ready-made models built purely from the declarative rule API.
//!
//! Infection terms follow the frequency-dependent form `beta * S * I / N` with
//! `beta = r0 * recovery_rate` and `N` the population size, so `r0` keeps its
//! meaning whether states are counts or fractions.

use crate::error::EpiResult;
use crate::model::DeterministicEpiModel;

fn with_infection(
    compartments: &[&str],
    population_size: f64,
    infection_rate: f64,
    exposed: &str,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = DeterministicEpiModel::new(compartments.iter().copied(), population_size)?;
    let scaled = infection_rate / population_size;
    model.set_quadratic_rates(
        [("S", "I", "S", -scaled), ("S", "I", exposed, scaled)],
        false,
    )?;
    Ok(model)
}

/// `S + I -> 2I`.
pub fn si_model(infection_rate: f64, population_size: f64) -> EpiResult<DeterministicEpiModel> {
    with_infection(&["S", "I"], population_size, infection_rate, "I")
}

/// SI with recovery back into S.
pub fn sis_model(
    infection_rate: f64,
    recovery_rate: f64,
    population_size: f64,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = with_infection(&["S", "I"], population_size, infection_rate, "I")?;
    model.add_transition_processes([("I", recovery_rate, "S")])?;
    Ok(model)
}

pub fn sir_model(
    r0: f64,
    recovery_rate: f64,
    population_size: f64,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = with_infection(&["S", "I", "R"], population_size, r0 * recovery_rate, "I")?;
    model.add_transition_processes([("I", recovery_rate, "R")])?;
    Ok(model)
}

/// SIR with immunity waning from R back to S.
pub fn sirs_model(
    r0: f64,
    recovery_rate: f64,
    waning_immunity_rate: f64,
    population_size: f64,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = sir_model(r0, recovery_rate, population_size)?;
    model.add_transition_processes([("R", waning_immunity_rate, "S")])?;
    Ok(model)
}

pub fn seir_model(
    r0: f64,
    recovery_rate: f64,
    symptomatic_rate: f64,
    population_size: f64,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = with_infection(
        &["S", "E", "I", "R"],
        population_size,
        r0 * recovery_rate,
        "E",
    )?;
    model.add_transition_processes([("E", symptomatic_rate, "I"), ("I", recovery_rate, "R")])?;
    Ok(model)
}

pub fn seirs_model(
    r0: f64,
    recovery_rate: f64,
    symptomatic_rate: f64,
    waning_immunity_rate: f64,
    population_size: f64,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = seir_model(r0, recovery_rate, symptomatic_rate, population_size)?;
    model.add_transition_processes([("R", waning_immunity_rate, "S")])?;
    Ok(model)
}

/// SIR with quarantined infecteds (X) and shielded susceptibles (H).
pub fn sirx_model(
    r0: f64,
    recovery_rate: f64,
    quarantine_rate: f64,
    containment_rate: f64,
    population_size: f64,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = with_infection(
        &["S", "I", "R", "X", "H"],
        population_size,
        r0 * recovery_rate,
        "I",
    )?;
    model.add_transition_processes([
        ("S", containment_rate, "H"),
        ("I", recovery_rate, "R"),
        ("I", containment_rate + quarantine_rate, "X"),
    ])?;
    Ok(model)
}

/// SIRX with a latent (E) stage between infection and infectiousness.
pub fn seirx_model(
    r0: f64,
    recovery_rate: f64,
    symptomatic_rate: f64,
    quarantine_rate: f64,
    containment_rate: f64,
    population_size: f64,
) -> EpiResult<DeterministicEpiModel> {
    let mut model = with_infection(
        &["S", "E", "I", "R", "X", "H"],
        population_size,
        r0 * recovery_rate,
        "E",
    )?;
    model.add_transition_processes([
        ("E", symptomatic_rate, "I"),
        ("S", containment_rate, "H"),
        ("I", recovery_rate, "R"),
        ("I", containment_rate + quarantine_rate, "X"),
    ])?;
    Ok(model)
}
