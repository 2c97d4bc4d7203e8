use crate::config::Config;
use crate::engine::Trajectory;
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Context, Result, bail};
use rmp_serde::encode;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Aggregated results over all runs of a simulation.
#[derive(Debug, Serialize, Deserialize)]
pub struct Results {
    pub n_runs: usize,
    /// Mean and standard deviation of the total population at every step.
    pub total_pop: Vec<AccumulatorReport>,
    /// Mean and standard deviation of the resistant population at every step.
    pub resistant_pop: Option<Vec<AccumulatorReport>>,
    /// Total population after the last step.
    pub final_pop: AccumulatorReport,
    /// Resistant population after the last step.
    pub final_resistant_pop: Option<AccumulatorReport>,
    /// Runs whose population was cleared by the last step.
    pub n_extinct: usize,
}

pub struct Analyzer {
    n_steps: usize,
    n_runs: usize,
    total_pop: Vec<Accumulator>,
    resistant_pop: Option<Vec<Accumulator>>,
    final_pop: Accumulator,
    final_resistant_pop: Option<Accumulator>,
    n_extinct: usize,
}

fn accumulators(n_steps: usize) -> Vec<Accumulator> {
    let mut acc_vec = Vec::new();
    acc_vec.resize_with(n_steps, Accumulator::new);
    acc_vec
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Self {
        let n_steps = cfg.output.n_steps;
        Self {
            n_steps,
            n_runs: 0,
            total_pop: accumulators(n_steps),
            resistant_pop: cfg.treatment.as_ref().map(|_| accumulators(n_steps)),
            final_pop: Accumulator::new(),
            final_resistant_pop: cfg.treatment.as_ref().map(|_| Accumulator::new()),
            n_extinct: 0,
        }
    }

    /// Fold the trajectory of one run into the results.
    pub fn add_trajectory(&mut self, trajectory: &Trajectory) -> Result<()> {
        if trajectory.n_steps() != self.n_steps {
            bail!(
                "trajectory must have {} steps, but has {}",
                self.n_steps,
                trajectory.n_steps()
            );
        }

        if self.resistant_pop.is_some() != trajectory.resistant_pop.is_some() {
            bail!("trajectory treatment does not match the config");
        }

        for (acc, &n) in self.total_pop.iter_mut().zip(&trajectory.total_pop) {
            acc.add(n as f64);
        }

        if let (Some(acc_vec), Some(series)) = (&mut self.resistant_pop, &trajectory.resistant_pop)
        {
            for (acc, &n) in acc_vec.iter_mut().zip(series) {
                acc.add(n as f64);
            }
            if let (Some(acc), Some(&n)) = (&mut self.final_resistant_pop, series.last()) {
                acc.add(n as f64);
            }
        }

        if let Some(&n) = trajectory.total_pop.last() {
            self.final_pop.add(n as f64);
            if n == 0 {
                self.n_extinct += 1;
            }
        }

        self.n_runs += 1;

        Ok(())
    }

    pub fn results(&self) -> Results {
        let reports = |acc_vec: &Vec<Accumulator>| -> Vec<AccumulatorReport> {
            acc_vec.iter().map(|acc| acc.report()).collect()
        };
        Results {
            n_runs: self.n_runs,
            total_pop: reports(&self.total_pop),
            resistant_pop: self.resistant_pop.as_ref().map(reports),
            final_pop: self.final_pop.report(),
            final_resistant_pop: self.final_resistant_pop.as_ref().map(Accumulator::report),
            n_extinct: self.n_extinct,
        }
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let results = self.results();
        log::info!(
            "final population over {} runs: {:.2} ± {:.2} ({} extinct)",
            results.n_runs,
            results.final_pop.mean,
            results.final_pop.std_dev,
            results.n_extinct
        );

        encode::write_named(&mut writer, &results).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}
