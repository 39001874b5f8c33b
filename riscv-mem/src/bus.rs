use std::collections::BTreeMap;

/// Capability implemented by everything that can service guest memory
/// traffic at device-relative offsets.
///
/// The access length is the slice length. Implementations must not panic on
/// out-of-range input; they report failure through the `bool` return and the
/// caller (the execution engine) turns a `false` into the guest's own
/// access-fault path. Range and length validation is entirely the device's
/// responsibility, never the bus's.
pub trait Device {
    fn load(&mut self, offset: u64, bytes: &mut [u8]) -> bool;
    fn store(&mut self, offset: u64, bytes: &[u8]) -> bool;
}

/// Physical address router: an address-ascending collection of
/// `(base address, device)` pairs.
///
/// An address resolves to the device with the greatest base address less
/// than or equal to it, so a device implicitly owns everything from its base
/// up to the next registered base. Partially overlapping declared ranges are
/// never detected; the device's own bounds check is what ultimately rejects
/// an out-of-range offset.
///
/// All access methods take `&mut self`. A bus shared between harts must be
/// serialized by the integrator (one access at a time); the bus itself holds
/// no locks.
#[derive(Default)]
pub struct Bus {
    devices: BTreeMap<u64, Box<dyn Device>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }

    /// Map `dev` at `base`, replacing (and dropping) any device previously
    /// mapped at exactly that base address.
    pub fn add_device(&mut self, base: u64, dev: Box<dyn Device>) {
        if self.devices.insert(base, dev).is_some() {
            log::warn!("[Bus] replaced device mapped at {:#x}", base);
        }
    }

    /// Entry with the greatest base address `<= addr`, or `None` when the
    /// bus is empty or every base lies above `addr`.
    #[inline]
    fn resolve_mut(&mut self, addr: u64) -> Option<(u64, &mut (dyn Device + 'static))> {
        let (base, dev) = self.devices.range_mut(..=addr).next_back()?;
        Some((*base, dev.as_mut()))
    }

    pub fn load(&mut self, addr: u64, bytes: &mut [u8]) -> bool {
        match self.resolve_mut(addr) {
            Some((base, dev)) => dev.load(addr - base, bytes),
            None => false,
        }
    }

    pub fn store(&mut self, addr: u64, bytes: &[u8]) -> bool {
        match self.resolve_mut(addr) {
            Some((base, dev)) => dev.store(addr - base, bytes),
            None => false,
        }
    }

    /// Resolve `addr` to its owning `(base, device)` pair without performing
    /// an access, so engine code can reason about ownership.
    pub fn find_device(&self, addr: u64) -> Option<(u64, &(dyn Device + 'static))> {
        let (base, dev) = self.devices.range(..=addr).next_back()?;
        Some((*base, dev.as_ref()))
    }
}
