use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use gridreg_core::{
    CAPACITY_POLL_SECS, DEFAULT_MAX_NODES, DEFAULT_MIN_FREE_NODES, QUEUE_POLL_SECS,
    SENTINEL_MAX_WAIT_SECS, SENTINEL_POLL_SECS, SUBMIT_RETRY_BUDGET, SUBMIT_RETRY_SECS,
};

/// Validated dispatcher configuration, constructed once at startup and
/// passed by reference. Recognized options are enumerated here; there is
/// no ad hoc attribute accumulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub cluster: ClusterConfig,
    pub update: UpdateConfig,
    pub build: BuildConfig,
    pub regress: RegressConfig,
    pub notify: NotifyConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue directory; entry names are revision tokens.
    pub dir: String,
    #[serde(default = "default_queue_poll")]
    pub poll_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_availability_command")]
    pub availability_command: String,
    #[serde(default = "default_submit_command")]
    pub submit_command: String,
    /// Pseudo-pools never eligible for selection.
    #[serde(default)]
    pub denylist: Vec<String>,
    /// Pools whose nodes carry two execution slots.
    #[serde(default)]
    pub dual_slot: Vec<String>,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    #[serde(default = "default_min_free_nodes")]
    pub min_free_nodes: usize,
    #[serde(default = "default_capacity_poll")]
    pub capacity_poll_secs: u64,
    /// Node feature label appended to the resource spec.
    #[serde(default = "default_node_label")]
    pub node_label: String,
    #[serde(default = "default_walltime")]
    pub walltime: String,
    #[serde(default = "default_cput")]
    pub cput: String,
    /// Parallel process-group launcher wrapped around the run command.
    #[serde(default)]
    pub launcher: Option<String>,
    #[serde(default = "default_submit_retry_secs")]
    pub submit_retry_secs: u64,
    #[serde(default = "default_submit_retry_budget")]
    pub submit_retry_budget: u32,
    #[serde(default = "default_sentinel_poll")]
    pub sentinel_poll_secs: u64,
    #[serde(default = "default_sentinel_max_wait")]
    pub sentinel_max_wait_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Commands run in order to bring the tree to a revision; `{rev}` is
    /// replaced with the token.
    pub commands: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_command")]
    pub command: String,
    #[serde(default = "default_clean_command")]
    pub clean_command: String,
    /// Resource spec for the compile node.
    #[serde(default = "default_build_resources")]
    pub resources: String,
    /// Build clean for every revision, as the legacy dispatcher did.
    #[serde(default = "default_true")]
    pub clean: bool,
    /// Build log, also the completion sentinel.
    #[serde(default = "default_build_report")]
    pub report: String,
    #[serde(default = "default_build_poll")]
    pub poll_secs: u64,
    #[serde(default = "default_build_max_wait")]
    pub max_wait_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegressConfig {
    /// Baseline database path.
    pub baseline: String,
    /// Corpus root.
    pub testpath: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    /// Command the batch job runs on the allocated nodes.
    #[serde(default = "default_runner")]
    pub runner: String,
    /// Accept differences as the new baseline after each run.
    #[serde(default = "default_true")]
    pub update_baselines: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub mail_to: Option<String>,
    #[serde(default = "default_mailer")]
    pub mailer: String,
    /// Relay command for the IRC/commit-bot hook.
    #[serde(default)]
    pub relay_command: Option<String>,
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_host")]
    pub host: String,
}

/// One regression target: an executable produced by the build plus the
/// devices its suite renders with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    /// Executable path relative to the working copy.
    pub exe: String,
    pub devices: Vec<String>,
}

fn default_queue_poll() -> u64 { QUEUE_POLL_SECS }
fn default_availability_command() -> String { "upnodes".into() }
fn default_submit_command() -> String { "qsub".into() }
fn default_max_nodes() -> usize { DEFAULT_MAX_NODES }
fn default_min_free_nodes() -> usize { DEFAULT_MIN_FREE_NODES }
fn default_capacity_poll() -> u64 { CAPACITY_POLL_SECS }
fn default_node_label() -> String { "run".into() }
fn default_walltime() -> String { "1:00:00".into() }
fn default_cput() -> String { "25000".into() }
fn default_submit_retry_secs() -> u64 { SUBMIT_RETRY_SECS }
fn default_submit_retry_budget() -> u32 { SUBMIT_RETRY_BUDGET }
fn default_sentinel_poll() -> u64 { SENTINEL_POLL_SECS }
fn default_sentinel_max_wait() -> u64 { SENTINEL_MAX_WAIT_SECS }
fn default_build_command() -> String { "make".into() }
fn default_clean_command() -> String { "make clean && make".into() }
fn default_build_resources() -> String { "nodes=1:build32".into() }
fn default_build_report() -> String { "update.log".into() }
fn default_build_poll() -> u64 { 5 }
fn default_build_max_wait() -> u64 { 60 * 60 }
fn default_scratch_dir() -> String { "/tmp".into() }
fn default_runner() -> String { "gridreg regress".into() }
fn default_mailer() -> String { "mail".into() }
fn default_product() -> String { "ghostpdl".into() }
fn default_host() -> String { "cluster".into() }
fn default_true() -> bool { true }

impl Config {
    pub fn default_config() -> Self {
        Self {
            queue: QueueConfig {
                dir: "../queue.pdl".into(),
                poll_secs: default_queue_poll(),
            },
            cluster: ClusterConfig {
                availability_command: default_availability_command(),
                submit_command: default_submit_command(),
                denylist: vec!["orange".into(), "green".into(), "total".into()],
                dual_slot: vec!["red".into(), "green".into()],
                max_nodes: default_max_nodes(),
                min_free_nodes: default_min_free_nodes(),
                capacity_poll_secs: default_capacity_poll(),
                node_label: default_node_label(),
                walltime: default_walltime(),
                cput: default_cput(),
                launcher: Some("mpiexec -comm mpich2-pmi -nostdin -kill -nostdout".into()),
                submit_retry_secs: default_submit_retry_secs(),
                submit_retry_budget: default_submit_retry_budget(),
                sentinel_poll_secs: default_sentinel_poll(),
                sentinel_max_wait_secs: default_sentinel_max_wait(),
            },
            update: UpdateConfig {
                commands: vec![
                    "svn up --ignore-externals -r{rev}".into(),
                    "svn up -r{rev} gs".into(),
                ],
            },
            build: BuildConfig {
                command: default_build_command(),
                clean_command: default_clean_command(),
                clean: true,
                resources: default_build_resources(),
                report: default_build_report(),
                poll_secs: default_build_poll(),
                max_wait_secs: default_build_max_wait(),
            },
            regress: RegressConfig {
                baseline: "reg_baseline.txt".into(),
                testpath: "~/tests".into(),
                scratch_dir: default_scratch_dir(),
                runner: default_runner(),
                update_baselines: true,
            },
            notify: NotifyConfig {
                mail_to: None,
                mailer: default_mailer(),
                relay_command: None,
                product: default_product(),
                host: default_host(),
            },
            targets: vec![
                TargetConfig {
                    name: "ghostpcl".into(),
                    exe: "main/obj/pcl6".into(),
                    devices: vec!["ppmraw".into(), "pbmraw".into(), "wtsimdi".into(), "bitrgb".into()],
                },
                TargetConfig {
                    name: "ghostxps".into(),
                    exe: "xps/obj/gxps".into(),
                    devices: vec!["ppmraw".into(), "pbmraw".into(), "wtsimdi".into(), "bitrgb".into()],
                },
                TargetConfig {
                    name: "ghostsvg".into(),
                    exe: "svg/obj/gsvg".into(),
                    devices: vec!["ppmraw".into(), "pbmraw".into()],
                },
            ],
        }
    }

    pub fn config_path(workdir: &Path) -> PathBuf {
        workdir.join("gridreg.toml")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse gridreg.toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(anyhow!("config needs at least one [[target]]"));
        }
        for target in &self.targets {
            if target.name.trim().is_empty() || target.exe.trim().is_empty() {
                return Err(anyhow!("every [[target]] needs a name and an exe"));
            }
            if target.devices.is_empty() {
                return Err(anyhow!("target {} has no devices", target.name));
            }
        }
        if self.cluster.max_nodes == 0 {
            return Err(anyhow!("cluster.max_nodes must be positive"));
        }
        if self.cluster.min_free_nodes == 0 {
            return Err(anyhow!("cluster.min_free_nodes must be positive"));
        }
        if self.update.commands.is_empty() {
            return Err(anyhow!("update.commands must not be empty"));
        }
        Ok(())
    }

    /// Queue directory with `~` expanded.
    pub fn queue_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.queue.dir).to_string())
    }

    pub fn baseline_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.regress.baseline).to_string())
    }

    pub fn testpath(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.regress.testpath).to_string())
    }
}
