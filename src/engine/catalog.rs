//! Module catalog

use crate::core::{BundleRoot, HostError, ModuleImage};
use crate::host::{FileSystem, ProcessHost};

/// Every mapped image whose normalized path lies inside `bundle`.
///
/// Keeps the loader's enumeration order and does not deduplicate.
pub fn list_bundle_modules<H, F>(
    host: &H,
    fs: &F,
    bundle: &BundleRoot,
) -> Result<Vec<ModuleImage>, HostError>
where
    H: ProcessHost + ?Sized,
    F: FileSystem + ?Sized,
{
    let modules: Vec<ModuleImage> = host
        .modules()?
        .into_iter()
        .map(|m| ModuleImage::new(fs.normalize(&m.path), m.base_address))
        .filter(|m| bundle.contains(&m.path))
        .collect();

    log::info!("{} module(s) mapped from {}", modules.len(), bundle);
    for module in &modules {
        log::debug!("  {:#x} {}", module.base_address, module.path.display());
    }
    Ok(modules)
}
