use std::fmt::{self, Display};
use std::str::FromStr;

#[derive(Hash, PartialEq, Eq, Debug, Clone, Copy)]
pub enum ControllerType {
    Cpu,
    CpuAcct,
    CpuSet,
    Memory,
    Blkio,
    Devices,
    Freezer,
}

pub const CONTROLLERS: &[ControllerType] = &[
    ControllerType::Cpu,
    ControllerType::CpuAcct,
    ControllerType::CpuSet,
    ControllerType::Memory,
    ControllerType::Blkio,
    ControllerType::Devices,
    ControllerType::Freezer,
];

impl Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let print = match self {
            Self::Cpu => "cpu",
            Self::CpuAcct => "cpuacct",
            Self::CpuSet => "cpuset",
            Self::Memory => "memory",
            Self::Blkio => "blkio",
            Self::Devices => "devices",
            Self::Freezer => "freezer",
        };

        write!(f, "{}", print)
    }
}

impl FromStr for ControllerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "cpuacct" => Ok(Self::CpuAcct),
            "cpuset" => Ok(Self::CpuSet),
            "memory" => Ok(Self::Memory),
            "blkio" => Ok(Self::Blkio),
            "devices" => Ok(Self::Devices),
            "freezer" => Ok(Self::Freezer),
            unknown => anyhow::bail!("unknown cgroup subsystem: {}", unknown),
        }
    }
}
