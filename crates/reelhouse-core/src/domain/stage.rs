use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// The six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Load,
    Clean,
    QualityCheck,
    BuildWarehouse,
    Analytics,
}

impl Stage {
    pub const ALL: [Self; 6] = [
        Self::Download,
        Self::Load,
        Self::Clean,
        Self::QualityCheck,
        Self::BuildWarehouse,
        Self::Analytics,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Load => "load",
            Self::Clean => "clean",
            Self::QualityCheck => "quality_check",
            Self::BuildWarehouse => "build_warehouse",
            Self::Analytics => "analytics",
        }
    }

    /// Stages from `from` to `to`, both inclusive.
    pub fn range(from: Self, to: Self) -> Result<Vec<Self>, ContractError> {
        if from > to {
            return Err(ContractError::ReversedStageRange { from, to });
        }

        Ok(Self::ALL
            .into_iter()
            .filter(|stage| *stage >= from && *stage <= to)
            .collect())
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ContractError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "download" => Ok(Self::Download),
            "load" => Ok(Self::Load),
            "clean" => Ok(Self::Clean),
            "quality_check" => Ok(Self::QualityCheck),
            "build_warehouse" => Ok(Self::BuildWarehouse),
            "analytics" => Ok(Self::Analytics),
            other => Err(ContractError::InvalidStage {
                value: other.to_owned(),
            }),
        }
    }
}
