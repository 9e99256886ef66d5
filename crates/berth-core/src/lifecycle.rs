//! Start ordering between the volume init step and the main workload.
//!
//! Every workload start runs exactly one [`InitStep`] to completion before
//! its [`MainStep`] is allowed to begin. The main workload assumes the
//! persistent volume's ownership and mode are correct and never checks
//! them itself, so [`Lifecycle`] refuses to enter `MainRunning` unless the
//! init step reported success during the same start.
//!
//! ```text
//! Pending ─► InitRunning ─┬─► InitSucceeded ─► MainRunning ─┬─► Ready
//!                         │                                 └─► MainFailed
//!                         └─► InitFailed ─► Halted
//! ```
//!
//! `Ready`, `MainFailed`, and `Halted` are terminal. The external restart
//! policy may call [`Lifecycle::restart`] to begin a fresh start from
//! `Pending`; the lifecycle itself never loops.

use crate::binding::{VolumeBinding, VolumeSource};
use crate::tag::ImageIdentifier;
use serde::{Deserialize, Serialize};

/// Default image used for the permission-fixing init step.
pub const DEFAULT_INIT_IMAGE: &str = "busybox:1.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// One-shot step that fixes ownership and mode of a persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitStep {
    pub image: String,
    pub mount_path: String,
    pub claim: String,
    pub owner: Ownership,
    /// Permission bits applied to the mount point.
    pub mode: u32,
}

/// Fixed script; owner, path, and mode arrive as positional parameters and
/// are never parsed by the shell.
const INIT_SCRIPT: &str = r#"chown -R "$1" "$2" && chmod "$3" "$2""#;

impl InitStep {
    /// Command run inside the init container.
    pub fn command(&self) -> Vec<String> {
        vec![
            "sh".to_owned(),
            "-c".to_owned(),
            INIT_SCRIPT.to_owned(),
            // $0
            "sh".to_owned(),
            format!("{}:{}", self.owner.uid, self.owner.gid),
            self.mount_path.clone(),
            format!("{:o}", self.mode),
        ]
    }
}

/// The workload container itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MainStep {
    pub name: String,
    pub image: ImageIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Init(InitStep),
    Main(MainStep),
}

/// Ordered start sequence: exactly one init step, then the main step.
///
/// Serializes as the list of steps in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "Vec<Step>")]
pub struct StartSequence {
    init: InitStep,
    main: MainStep,
}

impl StartSequence {
    pub fn init(&self) -> &InitStep {
        &self.init
    }

    pub fn main(&self) -> &MainStep {
        &self.main
    }

    /// Steps in execution order.
    pub fn steps(&self) -> [Step; 2] {
        [Step::Init(self.init.clone()), Step::Main(self.main.clone())]
    }
}

impl From<StartSequence> for Vec<Step> {
    fn from(sequence: StartSequence) -> Self {
        Vec::from(sequence.steps())
    }
}

/// Parse an octal permission string like `"0775"` or `"775"`.
pub fn parse_mode(mode: &str) -> crate::Result<u32> {
    let bits = u32::from_str_radix(mode, 8).map_err(|_| crate::Error::InvalidMode {
        mode: mode.to_owned(),
    })?;
    if bits > 0o7777 {
        return Err(crate::Error::InvalidMode {
            mode: mode.to_owned(),
        });
    }
    Ok(bits)
}

/// Build the start sequence guarding `volume`.
///
/// `volume` must be a writable persistent binding; config volumes are
/// managed by the orchestrator and cannot be re-owned.
pub fn sequence(
    volume: &VolumeBinding,
    init_image: &str,
    owner: Ownership,
    mode: u32,
    main: MainStep,
) -> crate::Result<StartSequence> {
    volume.validate()?;
    let VolumeSource::Persistent { claim } = &volume.source else {
        return Err(crate::Error::ConfigInvalid {
            reason: format!(
                "init step volume {} must be a persistent volume",
                volume.mount_path
            ),
        });
    };
    if volume.read_only {
        return Err(crate::Error::ConfigInvalid {
            reason: format!(
                "init step volume {} is mounted read-only",
                volume.mount_path
            ),
        });
    }

    Ok(StartSequence {
        init: InitStep {
            image: init_image.to_owned(),
            mount_path: volume.mount_path.clone(),
            claim: claim.clone(),
            owner,
            mode,
        },
        main,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartState {
    Pending,
    InitRunning,
    InitSucceeded,
    InitFailed,
    Halted,
    MainRunning,
    Ready,
    MainFailed,
}

impl StartState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StartState::Ready | StartState::MainFailed | StartState::Halted
        )
    }
}

impl std::fmt::Display for StartState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StartState::Pending => "pending",
            StartState::InitRunning => "init running",
            StartState::InitSucceeded => "init succeeded",
            StartState::InitFailed => "init failed",
            StartState::Halted => "halted",
            StartState::MainRunning => "main running",
            StartState::Ready => "ready",
            StartState::MainFailed => "main failed",
        };
        f.write_str(name)
    }
}

/// State machine for one workload start, recording every state entered.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: StartState,
    history: Vec<StartState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: StartState::Pending,
            history: vec![StartState::Pending],
        }
    }

    pub fn state(&self) -> StartState {
        self.state
    }

    pub fn history(&self) -> &[StartState] {
        &self.history
    }

    pub fn begin_init(&mut self) -> crate::Result<()> {
        self.expect(StartState::Pending, "begin init")?;
        self.enter(StartState::InitRunning);
        Ok(())
    }

    /// Record the init step's exit status. Failure halts this start.
    pub fn finish_init(&mut self, succeeded: bool) -> crate::Result<()> {
        self.expect(StartState::InitRunning, "finish init")?;
        if succeeded {
            self.enter(StartState::InitSucceeded);
        } else {
            self.enter(StartState::InitFailed);
            self.enter(StartState::Halted);
        }
        Ok(())
    }

    pub fn begin_main(&mut self) -> crate::Result<()> {
        self.expect(StartState::InitSucceeded, "begin main")?;
        self.enter(StartState::MainRunning);
        Ok(())
    }

    pub fn finish_main(&mut self, succeeded: bool) -> crate::Result<()> {
        self.expect(StartState::MainRunning, "finish main")?;
        self.enter(if succeeded {
            StartState::Ready
        } else {
            StartState::MainFailed
        });
        Ok(())
    }

    /// Begin a new start after a terminal state.
    pub fn restart(&mut self) -> crate::Result<()> {
        if !self.state.is_terminal() {
            return Err(crate::Error::InvalidTransition {
                from: self.state,
                event: "restart",
            });
        }
        self.enter(StartState::Pending);
        Ok(())
    }

    fn expect(&self, required: StartState, event: &'static str) -> crate::Result<()> {
        if self.state == required {
            Ok(())
        } else {
            Err(crate::Error::InvalidTransition {
                from: self.state,
                event,
            })
        }
    }

    fn enter(&mut self, next: StartState) {
        tracing::debug!(from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_volume() -> VolumeBinding {
        VolumeBinding {
            mount_path: "/data".to_owned(),
            source: VolumeSource::Persistent {
                claim: "bot-data".to_owned(),
            },
            read_only: false,
        }
    }

    fn main_step() -> MainStep {
        MainStep {
            name: "bot".to_owned(),
            image: ImageIdentifier {
                registry: "registry.example.com".to_owned(),
                repository: "bot".to_owned(),
                tag: "latest".to_owned(),
            },
        }
    }

    fn owner() -> Ownership {
        Ownership {
            uid: 1000,
            gid: 1000,
        }
    }

    #[test]
    fn sequence_orders_init_before_main() {
        let seq = sequence(&data_volume(), DEFAULT_INIT_IMAGE, owner(), 0o775, main_step()).unwrap();
        let steps = seq.steps();
        assert!(matches!(steps[0], Step::Init(_)));
        assert!(matches!(steps[1], Step::Main(_)));
        assert_eq!(seq.init().claim, "bot-data");
    }

    #[test]
    fn init_command_fixes_owner_and_mode() {
        let seq = sequence(&data_volume(), DEFAULT_INIT_IMAGE, owner(), 0o775, main_step()).unwrap();
        assert_eq!(
            seq.init().command(),
            vec![
                "sh",
                "-c",
                r#"chown -R "$1" "$2" && chmod "$3" "$2""#,
                "sh",
                "1000:1000",
                "/data",
                "775",
            ]
        );
    }

    #[test]
    fn init_command_keeps_path_out_of_the_script() {
        let mut volume = data_volume();
        volume.mount_path = "/data; touch /pwned".to_owned();
        let seq = sequence(&volume, DEFAULT_INIT_IMAGE, owner(), 0o775, main_step()).unwrap();

        let command = seq.init().command();
        assert!(!command[2].contains("pwned"));
        assert_eq!(command[5], "/data; touch /pwned");
    }

    #[test]
    fn sequence_rejects_relative_mount_path() {
        let mut volume = data_volume();
        volume.mount_path = "data".to_owned();
        let result = sequence(&volume, DEFAULT_INIT_IMAGE, owner(), 0o775, main_step());
        assert!(matches!(result, Err(crate::Error::InvalidMountPath { .. })));
    }

    #[test]
    fn sequence_rejects_config_volume() {
        let volume = VolumeBinding {
            mount_path: "/config".to_owned(),
            source: VolumeSource::Config {
                name: "bot-config".to_owned(),
            },
            read_only: true,
        };
        let result = sequence(&volume, DEFAULT_INIT_IMAGE, owner(), 0o775, main_step());
        assert!(matches!(result, Err(crate::Error::ConfigInvalid { .. })));
    }

    #[test]
    fn parse_mode_accepts_octal() {
        assert_eq!(parse_mode("0775").unwrap(), 0o775);
        assert_eq!(parse_mode("700").unwrap(), 0o700);
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn happy_path_reaches_ready() {
        let mut lc = Lifecycle::new();
        lc.begin_init().unwrap();
        lc.finish_init(true).unwrap();
        lc.begin_main().unwrap();
        lc.finish_main(true).unwrap();
        assert_eq!(
            lc.history(),
            &[
                StartState::Pending,
                StartState::InitRunning,
                StartState::InitSucceeded,
                StartState::MainRunning,
                StartState::Ready,
            ]
        );
    }

    #[test]
    fn init_failure_halts_and_blocks_main() {
        let mut lc = Lifecycle::new();
        lc.begin_init().unwrap();
        lc.finish_init(false).unwrap();
        assert_eq!(lc.state(), StartState::Halted);

        let err = lc.begin_main().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::InvalidTransition {
                from: StartState::Halted,
                ..
            }
        ));
        assert!(!lc.history().contains(&StartState::MainRunning));
    }

    #[test]
    fn main_cannot_start_before_init() {
        let mut lc = Lifecycle::new();
        assert!(lc.begin_main().is_err());
        lc.begin_init().unwrap();
        assert!(lc.begin_main().is_err());
    }

    #[test]
    fn restart_requires_terminal_state_and_reruns_init() {
        let mut lc = Lifecycle::new();
        assert!(lc.restart().is_err());

        lc.begin_init().unwrap();
        lc.finish_init(true).unwrap();
        lc.begin_main().unwrap();
        lc.finish_main(false).unwrap();
        assert_eq!(lc.state(), StartState::MainFailed);

        lc.restart().unwrap();
        assert_eq!(lc.state(), StartState::Pending);
        // A restarted start still has to pass through init.
        assert!(lc.begin_main().is_err());
        lc.begin_init().unwrap();
    }
}
