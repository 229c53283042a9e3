//! Command lines of the external trainer and generator.

use crate::config::TrainingSettings;
use crate::corpus::{CorpusLayout, GenerationUnit};
use crate::process::CommandSpec;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct TrainingCommands {
    layout: CorpusLayout,
    settings: TrainingSettings,
    working_dir: Option<PathBuf>,
}

impl TrainingCommands {
    pub fn new(layout: CorpusLayout, settings: TrainingSettings, working_dir: Option<PathBuf>) -> Self {
        Self {
            layout,
            settings,
            working_dir,
        }
    }

    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    /// Trains the unit's model into its run directory.
    pub fn trainer(&self, unit: &GenerationUnit) -> CommandSpec {
        CommandSpec::new(&self.settings.trainer_program)
            .arg(format!("--config={}", self.settings.model_config))
            .arg(format!("--run_dir={}", self.layout.run_dir(unit).display()))
            .arg(format!(
                "--sequence_example_file={}",
                self.layout.dataset_file().display()
            ))
            .arg(format!("--hparams={}", self.settings.hparams))
            .arg(format!(
                "--num_training_steps={}",
                self.settings.num_training_steps
            ))
            .current_dir(self.working_dir.clone())
    }

    /// Renders exactly one new track into the unit's output directory.
    pub fn generator(&self, unit: &GenerationUnit) -> CommandSpec {
        CommandSpec::new(&self.settings.generator_program)
            .arg(format!("--config={}", self.settings.model_config))
            .arg(format!("--run_dir={}", self.layout.run_dir(unit).display()))
            .arg(format!(
                "--output_dir={}",
                self.layout.output_dir(unit).display()
            ))
            .arg("--num_outputs=1")
            .arg(format!("--num_steps={}", self.settings.num_generation_steps))
            .arg(format!("--hparams={}", self.settings.hparams))
            .arg(format!("--primer_melody={}", self.settings.primer_melody))
            .current_dir(self.working_dir.clone())
    }
}
