//! Host registration sequence after a materialization.

use std::sync::Arc;

use uuid::Uuid;

use super::{HostError, HostResult, ModHost};

/// How the directory came to be where it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// New directory, never registered.
    Fresh,
    /// Same directory name as before; the host must re-read it.
    Reinstall,
    /// The directory was renamed from `old_dir_name`.
    Renamed { old_dir_name: String },
}

#[derive(Debug, Clone)]
pub struct RegistrationRequest<'a> {
    pub dir_name: &'a str,
    pub display_name: &'a str,
    pub registration: Registration,
    /// Collection to enable the mod in.
    pub collection: Option<Uuid>,
}

/// Drives [`ModHost`] calls for a materialized directory.
///
/// Failures are collected as warnings; the sequence always runs to the end.
#[derive(Clone)]
pub struct Registrar {
    host: Arc<dyn ModHost>,
    folder: String,
    replace_sort_name: bool,
}

fn soft(warnings: &mut Vec<HostError>, result: HostResult<()>) {
    if let Err(e) = result {
        tracing::warn!(operation = e.operation, target = %e.target, reason = %e.reason, "Host call failed");
        warnings.push(e);
    }
}

impl Registrar {
    pub fn new(host: Arc<dyn ModHost>) -> Self {
        Self {
            host,
            folder: String::new(),
            replace_sort_name: true,
        }
    }

    /// Folder new mods are placed in; empty leaves placement to the host.
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Replace the sort name of a renamed mod with its new display name.
    pub fn with_replace_sort_name(mut self, replace: bool) -> Self {
        self.replace_sort_name = replace;
        self
    }

    pub fn host(&self) -> &Arc<dyn ModHost> {
        &self.host
    }

    /// Register `request.dir_name`, returning every failed call.
    pub fn register(&self, request: &RegistrationRequest<'_>) -> Vec<HostError> {
        let mut warnings = Vec::new();
        let new = request.dir_name;

        let old_path = match &request.registration {
            Registration::Renamed { old_dir_name } => {
                let path = self.moved_path(old_dir_name, request.display_name, &mut warnings);
                soft(&mut warnings, self.host.delete_mod(old_dir_name));
                path
            }
            _ => None,
        };

        soft(&mut warnings, self.host.add_mod(new));

        if request.registration == Registration::Reinstall {
            soft(&mut warnings, self.host.reload_mod(new));
        }

        match old_path {
            Some(path) => soft(&mut warnings, self.host.set_mod_path(new, &path)),
            None if request.registration == Registration::Fresh && !self.folder.is_empty() => {
                let path = format!("{}/{}", self.folder, request.display_name);
                soft(&mut warnings, self.host.set_mod_path(new, &path));
            }
            None => {}
        }

        if let Registration::Renamed { old_dir_name } = &request.registration {
            soft(&mut warnings, self.host.copy_mod_settings(old_dir_name, new));
        }

        if let Some(collection) = request.collection {
            soft(&mut warnings, self.host.set_mod_enabled(collection, new, true));
        }

        tracing::info!(dir = %new, warnings = warnings.len(), "Registered mod with host");
        warnings
    }

    /// Old display path, with its last segment replaced when configured.
    fn moved_path(&self, old: &str, display_name: &str, warnings: &mut Vec<HostError>) -> Option<String> {
        let path = match self.host.mod_path(old) {
            Ok(path) => path?,
            Err(e) => {
                soft(warnings, Err(e));
                return None;
            }
        };
        if !self.replace_sort_name {
            return Some(path);
        }
        Some(match path.rsplit_once('/') {
            Some((folder, _)) => format!("{}/{}", folder, display_name),
            None => display_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::RecordingHost;

    fn request<'a>(registration: Registration) -> RegistrationRequest<'a> {
        RegistrationRequest {
            dir_name: "ml-Hat-2.0.0-deadbeef-0123",
            display_name: "[ML] Hat",
            registration,
            collection: None,
        }
    }

    #[test]
    fn test_fresh_sets_folder_path() {
        let host = Arc::new(RecordingHost::new("/mods"));
        let registrar = Registrar::new(host.clone()).with_folder("modlayer");

        let warnings = registrar.register(&request(Registration::Fresh));
        assert!(warnings.is_empty());
        assert_eq!(
            host.calls(),
            vec![
                "add_mod:ml-Hat-2.0.0-deadbeef-0123".to_string(),
                "set_mod_path:ml-Hat-2.0.0-deadbeef-0123=modlayer/[ML] Hat".to_string(),
            ]
        );
    }

    #[test]
    fn test_reinstall_reloads() {
        let host = Arc::new(RecordingHost::new("/mods"));
        let registrar = Registrar::new(host.clone()).with_folder("modlayer");

        registrar.register(&request(Registration::Reinstall));
        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("reload_mod:"));
    }

    #[test]
    fn test_rename_sequence() {
        let host = Arc::new(RecordingHost::new("/mods").with_path("old-dir", "Gear/[ML] Hat old"));
        let registrar = Registrar::new(host.clone()).with_folder("modlayer");
        let mut req = request(Registration::Renamed {
            old_dir_name: "old-dir".to_string(),
        });
        req.collection = Some(Uuid::nil());

        let warnings = registrar.register(&req);
        assert!(warnings.is_empty());

        let calls = host.calls();
        let ops: Vec<&str> = calls.iter().map(|c| c.split(':').next().unwrap()).collect();
        assert_eq!(
            ops,
            vec!["mod_path", "delete_mod", "add_mod", "set_mod_path", "copy_mod_settings", "set_mod_enabled"]
        );
        assert_eq!(calls[3], "set_mod_path:ml-Hat-2.0.0-deadbeef-0123=Gear/[ML] Hat");
        assert_eq!(calls[4], "copy_mod_settings:old-dir->ml-Hat-2.0.0-deadbeef-0123");
    }

    #[test]
    fn test_rename_keeps_sort_name_when_disabled() {
        let host = Arc::new(RecordingHost::new("/mods").with_path("old-dir", "Gear/Custom"));
        let registrar = Registrar::new(host.clone()).with_replace_sort_name(false);

        registrar.register(&request(Registration::Renamed {
            old_dir_name: "old-dir".to_string(),
        }));
        assert!(host
            .calls()
            .contains(&"set_mod_path:ml-Hat-2.0.0-deadbeef-0123=Gear/Custom".to_string()));
    }

    #[test]
    fn test_failures_are_soft() {
        let host = Arc::new(RecordingHost::new("/mods").failing("add_mod"));
        let registrar = Registrar::new(host.clone()).with_folder("modlayer");
        let mut req = request(Registration::Fresh);
        req.collection = Some(Uuid::nil());

        let warnings = registrar.register(&req);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].operation, "add_mod");
        // Later calls still happen.
        assert_eq!(host.calls().len(), 3);
    }
}
