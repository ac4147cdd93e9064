//! Ordered pipeline stages and their PowerShell rendering.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline has no stage {index} (len {len})")]
    NoSuchStage { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// Literal script text, possibly several statements.
    Script(String),
    /// A single command by name, fed by the previous stage.
    Command(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub kind: StageKind,
    /// Error records of this stage are written to its output stream.
    pub merge_errors: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_script(&mut self, text: impl Into<String>) -> &mut Self {
        self.push(StageKind::Script(text.into()))
    }

    pub fn add_command(&mut self, name: impl Into<String>) -> &mut Self {
        self.push(StageKind::Command(name.into()))
    }

    fn push(&mut self, kind: StageKind) -> &mut Self {
        self.stages.push(Stage { kind, merge_errors: false });
        self
    }

    /// Redirect the error stream of stage `index` into its output stream.
    pub fn merge_errors(&mut self, index: usize) -> Result<(), PipelineError> {
        let len = self.stages.len();
        let stage = self
            .stages
            .get_mut(index)
            .ok_or(PipelineError::NoSuchStage { index, len })?;
        stage.merge_errors = true;
        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Render as a single PowerShell statement. A terminating error stops
    /// the pipeline and runs `on_error`, with the error record in `$_`.
    pub fn render_powershell(&self, on_error: &str) -> String {
        if self.is_empty() {
            return String::new();
        }
        let body = self
            .stages
            .iter()
            .map(render_stage)
            .collect::<Vec<_>>()
            .join(" | ");
        format!("try {{\n{body}\n}} catch {{\n{}\n}}\n", on_error.trim_end())
    }
}

fn render_stage(stage: &Stage) -> String {
    let mut text = match &stage.kind {
        StageKind::Script(script) => format!("& {{\n{}\n}}", script.trim_matches('\n')),
        StageKind::Command(name) => name.clone(),
    };
    if stage.merge_errors {
        text.push_str(" 2>&1");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_keep_insertion_order() {
        let mut p = Pipeline::new();
        p.add_script("get-date").add_command("out-default");
        assert_eq!(p.stages().len(), 2);
        assert_eq!(p.stages()[0].kind, StageKind::Script("get-date".into()));
        assert_eq!(p.stages()[1].kind, StageKind::Command("out-default".into()));
        assert!(p.stages().iter().all(|s| !s.merge_errors));
    }

    #[test]
    fn merge_errors_marks_only_the_given_stage() {
        let mut p = Pipeline::new();
        p.add_script("get-date").add_command("out-default");
        p.merge_errors(0).unwrap();
        assert!(p.stages()[0].merge_errors);
        assert!(!p.stages()[1].merge_errors);
    }

    #[test]
    fn merge_errors_out_of_range() {
        let mut p = Pipeline::new();
        p.add_command("out-default");
        assert_eq!(p.merge_errors(1), Err(PipelineError::NoSuchStage { index: 1, len: 1 }));
    }

    #[test]
    fn renders_merged_script_into_terminal_command() {
        let mut p = Pipeline::new();
        p.add_script("\nget-process | sort handlecount\nget-date | out-string\n")
            .add_command("out-default");
        p.merge_errors(0).unwrap();
        assert_eq!(
            p.render_powershell("$_ | Out-Default\n"),
            "try {\n& {\nget-process | sort handlecount\nget-date | out-string\n} 2>&1 | out-default\n} catch {\n$_ | Out-Default\n}\n"
        );
    }

    #[test]
    fn empty_pipeline_renders_nothing() {
        assert!(Pipeline::new().is_empty());
        assert_eq!(Pipeline::new().render_powershell("$_ | Out-Default"), "");
    }
}
