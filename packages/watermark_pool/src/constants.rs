/// Panic message for lock acquisitions.
///
/// The crate never holds a lock across code that can panic, so a poisoned
/// lock indicates a bug in the crate itself.
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock";
