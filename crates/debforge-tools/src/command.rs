//! Packaging steps backed by external commands
//!
//! Each step runs a configured argv template with the package work
//! directory as its current directory. Placeholders are substituted per
//! argument:
//!
//! - `{package}`, `{series}`, `{mode}`, `{workdir}`
//! - `{upstream}` and `{branch}` from the registry resolution
//! - `{version}` once the prepare step reported one
//! - `{build_flags}`: empty for binary builds, `-S` for source-only builds
//!
//! Lines of the form `key=value` on stdout become structured step output;
//! `artifact=<path>` lines name produced files, relative to the work
//! directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use debforge_config::ToolCommands;
use debforge_core::{PackageId, PackagingSteps, StepOutput, StepRequest};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::control;

/// Exit status reported when the step binary does not exist
pub const COMMAND_NOT_FOUND: i32 = 127;

/// Branch used when the registry does not name one
pub const DEFAULT_BRANCH: &str = "master";

/// Directory, relative to the work directory, that holds the packaging tree
pub const SOURCE_DIR: &str = "src";

/// Lines of tool output kept in step messages
const MESSAGE_TAIL: usize = 40;

/// [`PackagingSteps`] running the configured command templates
#[derive(Debug, Clone)]
pub struct CommandSteps {
    commands: ToolCommands,
}

impl CommandSteps {
    pub fn new(commands: ToolCommands) -> Self {
        Self { commands }
    }

    /// Substitute placeholders in an argv template
    pub fn expand(template: &[String], request: &StepRequest) -> Vec<String> {
        let workdir = request.workdir.display().to_string();
        let (upstream, branch) = match &request.upstream {
            Some(source) => {
                (source.url.clone(), source.branch.clone().unwrap_or_else(|| DEFAULT_BRANCH.into()))
            }
            None => (String::new(), DEFAULT_BRANCH.to_string()),
        };
        let build_flags = if request.binary { "" } else { "-S" };

        template
            .iter()
            .filter(|arg| !(arg.as_str() == "{build_flags}" && build_flags.is_empty()))
            .map(|arg| {
                arg.replace("{package}", request.package.as_str())
                    .replace("{series}", &request.series)
                    .replace("{mode}", &request.mode.to_string())
                    .replace("{workdir}", &workdir)
                    .replace("{upstream}", &upstream)
                    .replace("{branch}", &branch)
                    .replace("{version}", request.version.as_deref().unwrap_or_default())
                    .replace("{build_flags}", build_flags)
            })
            .collect()
    }

    async fn run(&self, step: &str, template: &[String], request: &StepRequest) -> StepOutput {
        self.execute(step, template, request).await.0
    }

    /// Run a step, returning its output and raw stdout
    async fn execute(
        &self,
        step: &str,
        template: &[String],
        request: &StepRequest,
    ) -> (StepOutput, String) {
        let argv = Self::expand(template, request);
        let Some((program, args)) = argv.split_first() else {
            let output =
                StepOutput::failure(COMMAND_NOT_FOUND, format!("no {step} command configured"));
            return (output, String::new());
        };

        if let Err(e) = tokio::fs::create_dir_all(&request.workdir).await {
            let output =
                StepOutput::failure(1, format!("cannot create {}: {e}", request.workdir.display()));
            return (output, String::new());
        }

        info!("{}: running {} step: {}", request.package, step, argv.join(" "));
        let output = Command::new(program)
            .args(args)
            .current_dir(&request.workdir)
            .env("DEBFORGE_PACKAGE", request.package.as_str())
            .env("DEBFORGE_SERIES", &request.series)
            .env("DEBFORGE_MODE", request.mode.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{}: {} command not found: {}", request.package, step, program);
                let output =
                    StepOutput::failure(COMMAND_NOT_FOUND, format!("command not found: {program}"));
                return (output, String::new());
            }
            Err(e) => {
                let output = StepOutput::failure(1, format!("failed to start {program}: {e}"));
                return (output, String::new());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        debug!("{}: {} step exited with {}", request.package, step, exit_code);

        let mut result = if output.status.success() {
            StepOutput::ok()
        } else {
            StepOutput::failure(exit_code, String::new())
        };
        result.message = tail(&format!("{stdout}{stderr}"), MESSAGE_TAIL);
        if result.success {
            parse_structured(&stdout, &request.workdir, &mut result);
        }
        (result, stdout)
    }
}

#[async_trait]
impl PackagingSteps for CommandSteps {
    async fn fetch(&self, request: &StepRequest) -> StepOutput {
        self.run("fetch", &self.commands.fetch, request).await
    }

    async fn prepare(&self, request: &StepRequest) -> StepOutput {
        self.run("prepare", &self.commands.prepare, request).await
    }

    async fn derive_build_deps(&self, request: &StepRequest) -> debforge_core::Result<Vec<PackageId>> {
        let Some(command) = &self.commands.derive_deps else {
            let path = control::locate(&request.workdir.join(SOURCE_DIR))
                .or_else(|| control::locate(&request.workdir))
                .unwrap_or_else(|| request.workdir.join(SOURCE_DIR).join("debian/control"));
            return Ok(control::read_build_deps(&path)?);
        };

        let (output, stdout) = self.execute("derive-deps", command, request).await;
        if output.exit_code == COMMAND_NOT_FOUND {
            let tool = command.first().cloned().unwrap_or_default();
            return Err(debforge_core::Error::ToolMissing { tools: vec![tool] });
        }
        if !output.success {
            return Err(debforge_core::Error::discovery(format!(
                "build dependency command exited with status {}: {}",
                output.exit_code, output.message
            )));
        }

        stdout
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty() && !token.contains('='))
            .map(PackageId::new)
            .collect()
    }

    async fn import_and_patch(&self, request: &StepRequest) -> StepOutput {
        self.run("import-patch", &self.commands.import_patch, request).await
    }

    async fn build(&self, request: &StepRequest) -> StepOutput {
        self.run("build", &self.commands.build, request).await
    }
}

/// Copy `key=value` lines into the step output
fn parse_structured(stdout: &str, workdir: &Path, output: &mut StepOutput) {
    for line in stdout.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        if !is_key(key) {
            continue;
        }
        let value = value.trim();
        if key == "artifact" {
            let path = PathBuf::from(value);
            output.artifacts.push(if path.is_absolute() { path } else { workdir.join(path) });
        } else {
            output.data.insert(key.to_string(), value.to_string());
        }
    }
}

fn is_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use debforge_core::{BuildMode, UpstreamSource};

    use super::*;

    fn request(binary: bool) -> StepRequest {
        StepRequest {
            package: PackageId::new("nova").unwrap(),
            mode: BuildMode::Snapshot,
            series: "noble".to_string(),
            workdir: PathBuf::from("/work/nova"),
            upstream: Some(UpstreamSource {
                url: "https://opendev.org/openstack/nova".to_string(),
                branch: None,
                explicit: false,
            }),
            version: Some("29.0.0".to_string()),
            binary,
            data: Default::default(),
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expand_placeholders() {
        let template = argv(&["git", "clone", "--branch", "{branch}", "{upstream}", "{workdir}/src"]);
        assert_eq!(
            CommandSteps::expand(&template, &request(true)),
            argv(&[
                "git",
                "clone",
                "--branch",
                "master",
                "https://opendev.org/openstack/nova",
                "/work/nova/src"
            ])
        );

        let template = argv(&["echo", "{package}-{version}-{mode}-{series}"]);
        assert_eq!(
            CommandSteps::expand(&template, &request(true))[1],
            "nova-29.0.0-snapshot-noble"
        );
    }

    #[test]
    fn test_build_flags() {
        let template = argv(&["dpkg-buildpackage", "-us", "{build_flags}"]);
        assert_eq!(CommandSteps::expand(&template, &request(true)), argv(&["dpkg-buildpackage", "-us"]));
        assert_eq!(
            CommandSteps::expand(&template, &request(false)),
            argv(&["dpkg-buildpackage", "-us", "-S"])
        );

        let template = argv(&["sh", "-c", "dpkg-buildpackage {build_flags}"]);
        assert_eq!(CommandSteps::expand(&template, &request(false))[2], "dpkg-buildpackage -S");
    }

    #[test]
    fn test_parse_structured_output() {
        let mut output = StepOutput::ok();
        parse_structured(
            "Downloading...\nversion=29.0.0\ntarball=/tmp/nova.tar.gz\nartifact=nova_29.0.0_all.deb\nartifact=/abs/x.dsc\nNot A=Key\n",
            Path::new("/work/nova"),
            &mut output,
        );

        assert_eq!(output.data.get("version").map(String::as_str), Some("29.0.0"));
        assert_eq!(output.data.get("tarball").map(String::as_str), Some("/tmp/nova.tar.gz"));
        assert_eq!(output.data.len(), 2);
        assert_eq!(
            output.artifacts,
            vec![PathBuf::from("/work/nova/nova_29.0.0_all.deb"), PathBuf::from("/abs/x.dsc")]
        );
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }
}
