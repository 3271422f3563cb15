use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{LdaError, Result};

/// Hyper-parameters and resource limits of one training run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LdaConfig {
    pub num_topics: usize,
    /// Vocabulary size V; derived from the corpus when left at 0.
    pub num_vocabs: usize,
    pub alpha: f64,
    pub beta: f64,
    /// Metropolis-Hastings rounds per token.
    pub mh_step: usize,
    pub num_iterations: usize,
    pub load_factor: usize,
    pub num_worker_threads: usize,
    /// Cells of row memory one model slice may use; 0 means unbounded.
    pub model_max_capacity: usize,
    /// Cells of alias memory one slice may use; 0 means unbounded.
    pub alias_max_capacity: usize,
    pub doc_counter_capacity: usize,
    pub compute_ll_interval: Option<usize>,
    pub dump_model_interval: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for LdaConfig {
    fn default() -> LdaConfig {
        LdaConfig {
            num_topics: 100,
            num_vocabs: 0,
            alpha: 0.01,
            beta: 0.01,
            mh_step: 1,
            num_iterations: 10,
            load_factor: 2,
            num_worker_threads: 1,
            model_max_capacity: 0,
            alias_max_capacity: 0,
            doc_counter_capacity: 1024,
            compute_ll_interval: None,
            dump_model_interval: None,
            seed: None,
        }
    }
}

impl LdaConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<LdaConfig> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Total Dirichlet mass of the topic-word prior, βV.
    pub fn beta_sum(&self) -> f64 {
        self.beta * self.num_vocabs as f64
    }

    /// Total Dirichlet mass of the document-topic prior, αK.
    pub fn alpha_sum(&self) -> f64 {
        self.alpha * self.num_topics as f64
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_topics == 0 {
            return Err(LdaError::Config("num_topics must be positive".into()));
        }
        if self.num_topics > i32::max_value() as usize {
            return Err(LdaError::Config(format!("num_topics {} does not fit in 31 bits", self.num_topics)));
        }
        if !(self.alpha > 0.0) || !(self.beta > 0.0) {
            return Err(LdaError::Config(format!(
                "alpha and beta must be positive, got alpha = {}, beta = {}",
                self.alpha, self.beta
            )));
        }
        if self.mh_step == 0 {
            return Err(LdaError::Config("mh_step must be at least 1".into()));
        }
        // Sparse rows rely on capacity >= 2 * tf.
        if self.load_factor < 2 {
            return Err(LdaError::Config(format!("load_factor must be at least 2, got {}", self.load_factor)));
        }
        if self.num_worker_threads == 0 {
            return Err(LdaError::Config("num_worker_threads must be positive".into()));
        }
        if !self.doc_counter_capacity.is_power_of_two() {
            return Err(LdaError::Config(format!(
                "doc_counter_capacity must be a power of two, got {}",
                self.doc_counter_capacity
            )));
        }
        if self.compute_ll_interval == Some(0) || self.dump_model_interval == Some(0) {
            return Err(LdaError::Config("intervals must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LdaConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(LdaConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_small_load_factor() {
        let config = LdaConfig { load_factor: 1, ..LdaConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_priors() {
        let config = LdaConfig { alpha: 0.0, ..LdaConfig::default() };
        assert!(config.validate().is_err());
        let config = LdaConfig { beta: -1.0, ..LdaConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: LdaConfig = serde_json::from_str(r#"{"num_topics": 8, "mh_step": 2}"#).unwrap();
        assert_eq!(config.num_topics, 8);
        assert_eq!(config.mh_step, 2);
        assert_eq!(config.load_factor, LdaConfig::default().load_factor);
        assert!(config.validate().is_ok());
    }
}
