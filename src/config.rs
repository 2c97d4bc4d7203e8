use crate::utils::{check_num, check_prob};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub model: ModelConfig,
    pub init: InitConfig,
    pub treatment: Option<TreatmentConfig>,
    pub output: OutputConfig,
}

/// Per-particle and per-patient model parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Population ceiling of the patient.
    pub max_pop: usize,
    /// Reproduction probability at zero population density.
    pub prob_birth_max: f64,
    /// Clearance probability per step.
    pub prob_clear: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitConfig {
    /// Initial number of virus particles.
    pub n_virus: usize,
}

/// Drug treatment parameters.
///
/// When present, particles carry a resistance profile and drugs are
/// prescribed according to `schedule`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreatmentConfig {
    /// Initial resistance of every particle to every tracked drug.
    pub resistances: BTreeMap<String, bool>,
    /// Probability that offspring resistance to a drug differs from the parent's.
    pub prob_mut: f64,
    /// Drugs to prescribe and the steps at which to prescribe them.
    #[serde(default)]
    pub schedule: Vec<Dose>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dose {
    pub drug: String,
    pub step: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Number of steps per run.
    pub n_steps: usize,
    /// Seed of the random number generator (random if absent).
    pub seed: Option<u64>,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.model.validate().context("invalid model")?;

        check_num(self.init.n_virus, 1..).context("invalid initial number of viruses")?;

        check_num(self.output.n_steps, 1..).context("invalid number of steps")?;

        if let Some(treatment) = &self.treatment {
            treatment
                .validate(self.output.n_steps)
                .context("invalid treatment")?;
        }

        Ok(())
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.max_pop, 1..).context("invalid maximum population")?;
        check_prob(self.prob_birth_max).context("invalid maximum birth probability")?;
        check_prob(self.prob_clear).context("invalid clearance probability")?;
        Ok(())
    }
}

impl TreatmentConfig {
    fn validate(&self, n_steps: usize) -> Result<()> {
        check_prob(self.prob_mut).context("invalid mutation probability")?;
        for (i_dose, dose) in self.schedule.iter().enumerate() {
            if !self.resistances.contains_key(&dose.drug) {
                bail!(
                    "dose {i_dose} prescribes {:?}, which is missing from the resistance profile",
                    dose.drug
                );
            }
            check_num(dose.step, 0..n_steps)
                .with_context(|| format!("invalid step of dose {i_dose}"))?;
        }
        Ok(())
    }
}
