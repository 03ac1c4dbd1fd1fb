use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use diskprov_api::{
    config::{ArrayDevice, ProvisionSettings, VolumeRole},
    constants::LOG_FILE_PATH_DEFAULT,
};

use crate::DISKPROV_VERSION;

#[derive(Parser, Debug)]
#[clap(version = DISKPROV_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Which part of the database's storage the volume holds
#[derive(clap::ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    All,
    Data,
    Commitlog,
}

impl From<Role> for VolumeRole {
    fn from(role: Role) -> Self {
        match role {
            Role::All => VolumeRole::All,
            Role::Data => VolumeRole::Data,
            Role::Commitlog => VolumeRole::Commitlog,
        }
    }
}

fn parse_array_device(name: &str) -> Result<ArrayDevice, String> {
    name.parse().map_err(|e| format!("{e:?}"))
}

/// Flags shared by every command that selects disks.
#[derive(Args, Debug, Clone)]
pub struct Selection {
    /// Comma-separated list of disks to provision
    #[clap(long, value_delimiter = ',', num_args = 1..)]
    pub disks: Vec<PathBuf>,

    /// Array device to create, e.g. md3 or /dev/md3; picked from md0-md9 when
    /// omitted
    #[clap(long, value_parser = parse_array_device)]
    pub raid_device: Option<ArrayDevice>,

    /// Mount root of the database's storage [default: /var/lib/scylla]
    #[clap(long)]
    pub root: Option<PathBuf>,

    /// Part of the database's storage the volume holds [default: all]
    #[clap(long, value_enum)]
    pub volume_role: Option<Role>,

    /// Create an array even for a single disk
    #[clap(long)]
    pub force_array: bool,

    /// Filesystem block size in bytes [default: 4096]
    #[clap(long)]
    pub block_size: Option<u32>,

    /// Path to a YAML settings file; flags override its values
    #[clap(short, long)]
    pub config: Option<PathBuf>,
}

impl Selection {
    fn settings(&self) -> ProvisionSettings {
        ProvisionSettings {
            disks: self.disks.clone(),
            root: self.root.clone(),
            volume_role: self.volume_role.map(Into::into),
            raid_device: self.raid_device.clone(),
            force_array: self.force_array,
            block_size: self.block_size,
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Erase the disks and turn them into the database's mounted XFS volume
    Provision {
        #[clap(flatten)]
        selection: Selection,

        /// Mount the volume at every boot
        #[clap(long, visible_aliases = ["update-fstab", "enable-on-nextboot"])]
        enable_on_boot: bool,

        /// Mount with online discard
        #[clap(long)]
        online_discard: bool,

        /// Path to save an eventual fatal error
        #[clap(short, long)]
        error: Option<PathBuf>,

        /// Path of the JSON-lines log of the run
        #[clap(long, default_value = LOG_FILE_PATH_DEFAULT)]
        log_file: PathBuf,
    },

    /// Validate the disks and print what provisioning would build, without
    /// changing anything
    Plan {
        #[clap(flatten)]
        selection: Selection,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Provision { .. } => "provision",
            Commands::Plan { .. } => "plan",
        }
    }

    pub fn selection(&self) -> &Selection {
        match self {
            Commands::Provision { selection, .. } | Commands::Plan { selection } => selection,
        }
    }

    /// Settings given on the command line, to be layered over the settings
    /// file.
    pub fn settings(&self) -> ProvisionSettings {
        match self {
            Commands::Provision {
                selection,
                enable_on_boot,
                online_discard,
                ..
            } => ProvisionSettings {
                enable_on_boot: *enable_on_boot,
                online_discard: *online_discard,
                ..selection.settings()
            },
            Commands::Plan { selection } => selection.settings(),
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}
