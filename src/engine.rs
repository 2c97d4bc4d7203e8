use crate::config::{Config, ModelConfig, TreatmentConfig};
use crate::patient::Patient;
use crate::virus::Virus;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Population time series of a single run.
///
/// All series have one entry per step, recorded after the step's update.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<usize>,
    pub total_pop: Vec<usize>,
    /// Particles resistant to every drug introduced so far (treated runs only).
    pub resistant_pop: Option<Vec<usize>>,
}

impl Trajectory {
    fn with_capacity(n_steps: usize, treated: bool) -> Self {
        Self {
            times: Vec::with_capacity(n_steps),
            total_pop: Vec::with_capacity(n_steps),
            resistant_pop: treated.then(|| Vec::with_capacity(n_steps)),
        }
    }

    pub fn n_steps(&self) -> usize {
        self.times.len()
    }

    /// Save the trajectory to a MessagePack-encoded file.
    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize trajectory")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a trajectory previously written by [`Trajectory::save`].
    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let trajectory = decode::from_read(&mut reader).context("failed to deserialize trajectory")?;
        Ok(trajectory)
    }
}

/// Simulate an untreated infection for `n_steps` steps.
pub fn simulate_without_drug<R: Rng + ?Sized>(
    model: &ModelConfig,
    n_virus: usize,
    n_steps: usize,
    rng: &mut R,
) -> Result<Trajectory> {
    let viruses = (0..n_virus)
        .map(|_| Virus::new(model.prob_birth_max, model.prob_clear))
        .collect::<Result<Vec<_>>>()
        .context("failed to create initial viruses")?;
    let mut patient = Patient::new(viruses, model.max_pop).context("failed to create patient")?;

    let mut trajectory = Trajectory::with_capacity(n_steps, false);
    for step in 0..n_steps {
        patient
            .update(rng)
            .with_context(|| format!("failed to perform step {step}"))?;
        let total_pop = patient.total_population();
        log::debug!("step {step}: {total_pop} viruses, density {:?}", patient.pop_density());
        trajectory.times.push(step);
        trajectory.total_pop.push(total_pop);
        log_progress(step, n_steps);
    }

    Ok(trajectory)
}

/// Simulate an infection treated according to `treatment.schedule`.
///
/// Drugs scheduled for a step are prescribed before that step's update.
/// The resistant population is counted against every drug introduced so far.
pub fn simulate_with_drug<R: Rng + ?Sized>(
    model: &ModelConfig,
    n_virus: usize,
    treatment: &TreatmentConfig,
    n_steps: usize,
    rng: &mut R,
) -> Result<Trajectory> {
    let viruses = (0..n_virus)
        .map(|_| {
            Virus::with_resistance(
                model.prob_birth_max,
                model.prob_clear,
                treatment.resistances.clone(),
                treatment.prob_mut,
            )
        })
        .collect::<Result<Vec<_>>>()
        .context("failed to create initial viruses")?;
    let mut patient = Patient::new(viruses, model.max_pop).context("failed to create patient")?;

    let mut introduced = BTreeSet::new();
    let mut trajectory = Trajectory::with_capacity(n_steps, true);
    for step in 0..n_steps {
        for dose in treatment.schedule.iter().filter(|dose| dose.step == step) {
            patient.add_prescription(&dose.drug);
            introduced.insert(dose.drug.clone());
            log::info!("prescribed {:?} at step {step}", dose.drug);
        }

        patient
            .update(rng)
            .with_context(|| format!("failed to perform step {step}"))?;
        let total_pop = patient.total_population();
        let resistant_pop = patient
            .resistant_population(&introduced)
            .with_context(|| format!("failed to count resistant population at step {step}"))?;

        log::debug!("step {step}: {total_pop} viruses, {resistant_pop} resistant");
        trajectory.times.push(step);
        trajectory.total_pop.push(total_pop);
        if let Some(series) = &mut trajectory.resistant_pop {
            series.push(resistant_pop);
        }
        log_progress(step, n_steps);
    }

    log::debug!("active drugs at the end: {:?}", patient.prescriptions());

    Ok(trajectory)
}

fn log_progress(step: usize, n_steps: usize) {
    let n_report = (n_steps / 10).max(1);
    if (step + 1) % n_report == 0 || step + 1 == n_steps {
        let progress = 100.0 * (step + 1) as f64 / n_steps as f64;
        log::info!("completed {progress:06.2}%");
    }
}

/// Simulation engine.
///
/// Holds the configuration and random number generator of one run.
pub struct Engine {
    cfg: Config,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` for run `run_idx`.
    ///
    /// With a configured seed every run uses its own stream of the same seed,
    /// so runs stay independent but reproducible.
    pub fn new(cfg: Config, run_idx: usize) -> Result<Self> {
        let rng = match cfg.output.seed {
            Some(seed) => {
                let mut rng = ChaCha12Rng::seed_from_u64(seed);
                rng.set_stream(run_idx as u64);
                rng
            }
            None => ChaCha12Rng::try_from_os_rng()?,
        };
        Ok(Self { cfg, rng })
    }

    /// Perform the configured simulation and return its trajectory.
    pub fn perform_simulation(&mut self) -> Result<Trajectory> {
        let model = &self.cfg.model;
        let n_virus = self.cfg.init.n_virus;
        let n_steps = self.cfg.output.n_steps;
        match &self.cfg.treatment {
            None => simulate_without_drug(model, n_virus, n_steps, &mut self.rng),
            Some(treatment) => {
                simulate_with_drug(model, n_virus, treatment, n_steps, &mut self.rng)
            }
        }
    }
}
