//! Queue family classification.
//!
//! A family qualifies for a capability when its flag mask contains that
//! flag. Among qualifying families the one with the numerically smallest
//! overall mask wins, which steers transfer work to a dedicated DMA family
//! and compute work to an async-compute family when the hardware has them.

use ash::vk;
use thiserror::Error;

/// The capability a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Transfer,
    Compute,
}

impl QueueType {
    pub const ALL: [QueueType; 3] =
        [QueueType::Graphics, QueueType::Transfer, QueueType::Compute];

    pub fn required_flags(self) -> vk::QueueFlags {
        match self {
            QueueType::Graphics => vk::QueueFlags::GRAPHICS,
            QueueType::Transfer => vk::QueueFlags::TRANSFER,
            QueueType::Compute => vk::QueueFlags::COMPUTE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Least-capable qualifying family per queue type.
    #[default]
    Auto,
    /// Every queue type on the graphics family.
    Unified,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyQueuesError {
    #[error("No queue family supports graphics")]
    NoGraphicsFamily,
    #[error("No queue family supports compute")]
    NoComputeFamily,
}

/// Index of the least-capable family whose flags contain `requested`.
///
/// Ties keep the lowest family index.
pub fn select_queue_family(
    families: &[vk::QueueFlags],
    requested: vk::QueueFlags,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, flags)| flags.contains(requested))
        .min_by_key(|(_, flags)| flags.as_raw())
        .map(|(idx, _)| idx as u32)
}

/// The family index chosen for each [`QueueType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilySelection {
    /// Classify `families` (indexed by family index).
    ///
    /// Graphics and compute are mandatory. Transfer falls back to the
    /// graphics family when nothing advertises `TRANSFER` explicitly, since
    /// graphics families implicitly support transfer operations.
    pub fn classify(
        families: &[vk::QueueFlags],
        mode: QueueMode,
    ) -> Result<Self, ClassifyQueuesError> {
        let graphics = select_queue_family(families, vk::QueueFlags::GRAPHICS)
            .ok_or(ClassifyQueuesError::NoGraphicsFamily)?;

        if mode == QueueMode::Unified {
            if !families[graphics as usize].contains(vk::QueueFlags::COMPUTE) {
                return Err(ClassifyQueuesError::NoComputeFamily);
            }
            return Ok(Self {
                graphics,
                compute: graphics,
                transfer: graphics,
            });
        }

        let compute = select_queue_family(families, vk::QueueFlags::COMPUTE)
            .ok_or(ClassifyQueuesError::NoComputeFamily)?;
        let transfer = select_queue_family(families, vk::QueueFlags::TRANSFER)
            .unwrap_or(graphics);

        Ok(Self {
            graphics,
            compute,
            transfer,
        })
    }

    pub fn family(&self, queue_type: QueueType) -> u32 {
        match queue_type {
            QueueType::Graphics => self.graphics,
            QueueType::Transfer => self.transfer,
            QueueType::Compute => self.compute,
        }
    }

    /// Distinct family indices in graphics, compute, transfer order.
    pub fn distinct_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics, self.compute, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use vk::QueueFlags as Q;

    #[test]
    fn dedicated_transfer_family_is_preferred() {
        let families = [Q::GRAPHICS | Q::COMPUTE | Q::TRANSFER, Q::TRANSFER];

        let selection =
            QueueFamilySelection::classify(&families, QueueMode::Auto)
                .unwrap();

        assert_eq!(selection.graphics, 0);
        assert_eq!(selection.compute, 0);
        assert_eq!(selection.transfer, 1);
        assert_eq!(selection.distinct_families(), vec![0, 1]);
    }

    #[test]
    fn async_compute_family_is_preferred() {
        let families = [
            Q::GRAPHICS | Q::COMPUTE | Q::TRANSFER | Q::SPARSE_BINDING,
            Q::COMPUTE | Q::TRANSFER,
            Q::TRANSFER,
        ];

        let selection =
            QueueFamilySelection::classify(&families, QueueMode::Auto)
                .unwrap();

        assert_eq!(selection.graphics, 0);
        assert_eq!(selection.compute, 1);
        assert_eq!(selection.transfer, 2);
        assert_eq!(selection.distinct_families(), vec![0, 1, 2]);
    }

    #[test]
    fn transfer_falls_back_to_graphics() {
        let families = [Q::GRAPHICS | Q::COMPUTE];

        let selection =
            QueueFamilySelection::classify(&families, QueueMode::Auto)
                .unwrap();

        assert_eq!(selection.transfer, selection.graphics);
        assert_eq!(selection.distinct_families(), vec![0]);
    }

    #[test]
    fn missing_graphics_or_compute_is_fatal() {
        assert_eq!(
            QueueFamilySelection::classify(
                &[Q::COMPUTE | Q::TRANSFER],
                QueueMode::Auto
            ),
            Err(ClassifyQueuesError::NoGraphicsFamily)
        );
        assert_eq!(
            QueueFamilySelection::classify(
                &[Q::GRAPHICS | Q::TRANSFER],
                QueueMode::Auto
            ),
            Err(ClassifyQueuesError::NoComputeFamily)
        );
    }

    #[test]
    fn ties_keep_first_family() {
        let families = [Q::COMPUTE | Q::TRANSFER, Q::COMPUTE | Q::TRANSFER];

        assert_eq!(select_queue_family(&families, Q::COMPUTE), Some(0));
        assert_eq!(select_queue_family(&families, Q::GRAPHICS), None);
    }

    #[test]
    fn unified_mode_uses_graphics_family_everywhere() {
        let families = [Q::GRAPHICS | Q::COMPUTE | Q::TRANSFER, Q::TRANSFER];

        let selection =
            QueueFamilySelection::classify(&families, QueueMode::Unified)
                .unwrap();

        assert_eq!(selection.family(QueueType::Transfer), 0);
        assert_eq!(selection.family(QueueType::Compute), 0);
    }
}
