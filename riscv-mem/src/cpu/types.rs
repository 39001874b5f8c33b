use thiserror::Error;

/// Guest-visible faults raised on the execution side.
///
/// The access-fault arms are what the engine converts a `false` bus verdict
/// into; they never originate inside the bus or a device.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("illegal instruction ({0:#x})")]
    IllegalInstruction(u64),
    #[error("load access fault at {0:#x}")]
    LoadAccessFault(u64),
    #[error("store access fault at {0:#x}")]
    StoreAccessFault(u64),
}

/// Privilege mode of a hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    User,
    Supervisor,
    Machine,
}

impl Mode {
    /// Numeric privilege level as encoded in CSR addresses.
    pub fn privilege_level(self) -> u8 {
        match self {
            Mode::User => 0,
            Mode::Supervisor => 1,
            Mode::Machine => 3,
        }
    }
}

/// Active execution width of a hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Xlen {
    Rv32,
    Rv64,
}
