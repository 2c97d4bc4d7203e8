use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::{Engine, Trajectory};
use anyhow::{Context, Result};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Manages the runs of a simulation directory.
///
/// The directory holds `config.toml`, one `run-NNNN` directory per run and,
/// after analysis, `results.msgpack`.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Perform a new run and save its trajectory.
    pub fn create_run(&self) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let mut engine =
            Engine::new(self.cfg.clone(), run_idx).context("failed to construct engine")?;
        let trajectory = engine
            .perform_simulation()
            .context("failed to perform simulation")?;

        let trajectory_file = self.trajectory_file(run_idx);
        trajectory
            .save(&trajectory_file)
            .with_context(|| format!("failed to save {trajectory_file:?}"))?;
        log::info!("saved {trajectory_file:?}");

        Ok(())
    }

    /// Aggregate the trajectories of all runs.
    pub fn analyze_sim(&self) -> Result<()> {
        let mut analyzer = Analyzer::new(&self.cfg);

        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let trajectory_file = self.trajectory_file(run_idx);
            let trajectory = Trajectory::load(&trajectory_file)
                .with_context(|| format!("failed to load {trajectory_file:?}"))?;
            analyzer
                .add_trajectory(&trajectory)
                .with_context(|| format!("failed to analyze {trajectory_file:?}"))?;
        }

        let results_file = self.results_file();
        analyzer
            .save_results(&results_file)
            .context("failed to save results")?;
        log::info!("saved {results_file:?}");

        Ok(())
    }

    /// Remove every run and the analysis results.
    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.run_dirs().context("failed to list run dirs")? {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }

        let results_file = self.results_file();
        if results_file.exists() {
            fs::remove_file(&results_file)
                .with_context(|| format!("failed to remove {results_file:?}"))?;
            log::info!("removed {results_file:?}");
        }

        Ok(())
    }

    fn run_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let run_dirs = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        Ok(run_dirs)
    }

    fn count_run_dirs(&self) -> Result<usize> {
        Ok(self.run_dirs()?.len())
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn trajectory_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("trajectory.msgpack")
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.msgpack")
    }
}
