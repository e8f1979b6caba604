use ash::vk;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl From<PresentMode> for vk::PresentModeKHR {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

/// Uses the preferred mode when the surface offers it. FIFO is the only mode every surface
/// supports.
pub fn choose_present_mode(
    preferred: PresentMode,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    let preferred = vk::PresentModeKHR::from(preferred);
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(PresentMode::Mailbox, &available),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(PresentMode::Immediate, &available),
            vk::PresentModeKHR::IMMEDIATE
        );
    }
}
