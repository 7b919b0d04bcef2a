//! Structured stage commands and their inspectable script rendering.
//!
//! A [`StageCommand`] is an ordered argument vector, executed directly by
//! default. The same command is rendered into a `.sh`/`.bat` script with
//! explicit quoting so that a stage can be re-run by hand.

use crate::error::TrainingResult;
use crate::layout::TrainingLayout;
use crate::runner::ProcessSpec;
use std::path::{Path, PathBuf};

pub const PRE_ENCODE_BATCH_SIZE: u32 = 16;
pub const PRE_ENCODE_SAMPLE_SIZE: u64 = 524_288;
pub const TRAIN_PRECISION: &str = "16-mixed";

/// Location of the external interpreter and the training toolkit checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub python: String,
    /// Relative paths resolve against the install root.
    pub tools_dir: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self { python: "python".to_string(), tools_dir: PathBuf::from("stable-audio-tools") }
    }
}

impl Toolchain {
    #[must_use]
    pub fn tool(&self, layout: &TrainingLayout, file: &str) -> PathBuf {
        layout.resolve(self.tools_dir.join(file))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPlatform {
    Posix,
    Windows,
}

impl ScriptPlatform {
    #[must_use]
    pub fn host() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Posix }
    }

    #[must_use]
    pub fn continuation(self) -> char {
        match self {
            Self::Posix => '\\',
            Self::Windows => '^',
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Posix => "sh",
            Self::Windows => "bat",
        }
    }

    /// Quotes `arg` for this platform's shell. Arguments made only of
    /// unambiguous characters are left bare.
    #[must_use]
    pub fn quote(self, arg: &str) -> String {
        let bare = !arg.is_empty()
            && arg.chars().all(|c| c.is_ascii_alphanumeric() || "_-+=.,:/@%".contains(c))
            && !(self == Self::Windows && arg.contains('%'));
        if bare {
            return arg.to_string();
        }
        match self {
            Self::Posix => format!("'{}'", arg.replace('\'', r"'\''")),
            Self::Windows => format!("\"{}\"", arg.replace('"', "\"\"").replace('%', "%%")),
        }
    }

    /// How to execute a rendered script file.
    #[must_use]
    pub fn launcher(self, script: &Path, cwd: &Path) -> ProcessSpec {
        let script = script.display().to_string();
        match self {
            Self::Posix => ProcessSpec::new("bash", cwd).arg(script),
            Self::Windows => ProcessSpec::new("cmd", cwd).arg("/C").arg(script),
        }
    }
}

/// A program plus argument groups. Each group (a flag and its value) is one
/// line of the rendered script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    program: String,
    head: Vec<String>,
    groups: Vec<Vec<String>>,
}

impl StageCommand {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), head: Vec::new(), groups: Vec::new() }
    }

    /// Positional argument rendered on the first line.
    #[must_use]
    pub fn positional(mut self, arg: impl Into<String>) -> Self {
        self.head.push(arg.into());
        self
    }

    #[must_use]
    pub fn flag(mut self, name: &str) -> Self {
        self.groups.push(vec![name.to_string()]);
        self
    }

    #[must_use]
    pub fn option(mut self, name: &str, value: impl ToString) -> Self {
        self.groups.push(vec![name.to_string(), value.to_string()]);
        self
    }

    #[must_use]
    pub fn path_option(self, name: &str, value: &Path) -> Self {
        self.option(name, value.display())
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in execution order, program excluded.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        self.head.iter().chain(self.groups.iter().flatten()).cloned().collect()
    }

    #[must_use]
    pub fn to_process_spec(&self, cwd: &Path) -> ProcessSpec {
        ProcessSpec::new(self.program.clone(), cwd).args(self.args())
    }

    /// One logical command split over lines with the platform's
    /// continuation character.
    #[must_use]
    pub fn render(&self, platform: ScriptPlatform) -> String {
        let first = std::iter::once(&self.program)
            .chain(&self.head)
            .map(|a| platform.quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        let mut lines = vec![first];
        lines.extend(
            self.groups
                .iter()
                .map(|g| format!("    {}", g.iter().map(|a| platform.quote(a)).collect::<Vec<_>>().join(" "))),
        );

        let continuation = format!(" {}", platform.continuation());
        let last = lines.len() - 1;
        let mut out = String::new();
        if platform == ScriptPlatform::Posix {
            out.push_str("#!/usr/bin/env bash\n");
        }
        for (i, line) in lines.iter().enumerate() {
            out.push_str(line);
            if i < last {
                out.push_str(&continuation);
            }
            out.push('\n');
        }
        out
    }
}

/// Renders `command` and writes it to `path`, replacing any previous script.
pub fn write_script(path: &Path, command: &StageCommand, platform: ScriptPlatform) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, command.render(platform))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

pub struct PreEncodeArgs<'a> {
    pub dataset_config: &'a Path,
    pub model_config: &'a Path,
    pub checkpoint: &'a Path,
    pub output_dir: &'a Path,
}

#[must_use]
pub fn pre_encode_command(toolchain: &Toolchain, layout: &TrainingLayout, args: &PreEncodeArgs<'_>) -> StageCommand {
    StageCommand::new(&toolchain.python)
        .positional(toolchain.tool(layout, "pre_encode.py").display().to_string())
        .path_option("--dataset-config", args.dataset_config)
        .path_option("--model-config", args.model_config)
        .path_option("--ckpt-path", args.checkpoint)
        .flag("--model-half")
        .path_option("--output-path", args.output_dir)
        .option("--batch-size", PRE_ENCODE_BATCH_SIZE)
        .option("--sample-size", PRE_ENCODE_SAMPLE_SIZE)
}

pub struct TrainArgs<'a> {
    pub name: &'a str,
    pub pretrained_checkpoint: &'a Path,
    pub model_config: &'a Path,
    pub dataset_config: &'a Path,
    pub save_dir: &'a Path,
    pub batch_size: u32,
    pub workers: u32,
    pub seed: u64,
    pub checkpoint_every: u64,
}

#[must_use]
pub fn train_command(toolchain: &Toolchain, layout: &TrainingLayout, args: &TrainArgs<'_>) -> StageCommand {
    StageCommand::new(&toolchain.python)
        .positional(toolchain.tool(layout, "train.py").display().to_string())
        .option("--name", args.name)
        .path_option("--pretrained-ckpt-path", args.pretrained_checkpoint)
        .path_option("--model-config", args.model_config)
        .option("--batch-size", args.batch_size)
        .option("--num-workers", args.workers)
        .option("--seed", args.seed)
        .path_option("--config-file", &toolchain.tool(layout, "defaults.ini"))
        .option("--checkpoint-every", args.checkpoint_every)
        .path_option("--dataset-config", args.dataset_config)
        .path_option("--save-dir", args.save_dir)
        .option("--precision", TRAIN_PRECISION)
}
