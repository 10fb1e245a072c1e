//! Builds host descriptor files from a resolved version.
//!
//! The builder is pure: [`ManifestBuilder::build`] turns a [`VersionInfo`]
//! and the caller's [`OptionSelection`] into a [`ModPack`], and
//! [`ModPack::write`] puts it on disk. Group descriptors are emitted for
//! every catalog group so ordering and types stay stable across updates;
//! groups the caller did not select end up with zero options.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;

use crate::catalog::{
    ContainerInfo, GroupInfo, GroupKind, ImcOptionInfo, OptionInfo, VariantSummary, VersionInfo,
};
use crate::content::fs::{self as cfs, write_atomic, FsError};
use crate::content::{extension_of, ContentStore, FILES_DIR};
use crate::package::{slugify, ModManifest, OptionSelection};
use crate::package::manifest::MANIFEST_VERSION;
use crate::progress::Progress;

use super::model::{
    normalize_manipulation, CombiningContainer, CombiningGroup, CombiningOption, DefaultMod,
    FileMap, GroupFile, ImcGroup, ImcOption, ModMeta, OptionItem, StandardGroup, COVER_FILE,
    DEFAULT_MOD_FILE, META_FILE, META_FILE_VERSION,
};
use super::{ManifestError, ManifestResult};

/// Options per group in a multi group; the host stores selections as a
/// 32-bit mask.
pub const MULTI_GROUP_WIDTH: usize = 32;

/// Tag added to partial installs.
pub const PARTIAL_INSTALL_TAG: &str = "partial-install";

/// Game paths the host loads as UI resources. A stored file referenced by
/// several of them gets one hard-linked name per reference.
pub const UI_PREFIX: &str = "ui/";

/// Check that a game path stays inside the mod directory.
///
/// Game paths are written into descriptors verbatim; only absolute paths,
/// drive prefixes and `..` segments are refused. On-disk names never come
/// from game paths beyond their sanitized extension.
pub fn validate_game_path(game_path: &str) -> ManifestResult<()> {
    let escape = || ManifestError::PathEscape(game_path.to_string());
    let bytes = game_path.as_bytes();
    if game_path.trim().is_empty()
        || game_path.starts_with(['/', '\\'])
        || (bytes.len() >= 2 && bytes[1] == b':')
    {
        return Err(escape());
    }
    if game_path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(escape());
    }
    Ok(())
}

/// Content path written into descriptors for `hash` served at `game_path`.
pub fn content_path(hash: &str, game_path: &str) -> String {
    format!(
        "{}\\{}",
        FILES_DIR,
        ContentStore::file_name(hash, &extension_of(game_path))
    )
}

/// Split a content path produced by [`content_path`] back into its hash
/// and extension.
fn parse_content_path(path: &str) -> Option<(&str, &str)> {
    let name = path.strip_prefix(FILES_DIR)?.strip_prefix('\\')?;
    Some(name.split_once('.').unwrap_or((name, "")))
}

/// A stored file that needs extra hard-linked names, one per UI reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiDuplicate {
    pub hash: String,
    pub extension: String,
    /// Names `1..=copies` are referenced by descriptors.
    pub copies: usize,
}

/// File name for the group written at `position` (0-based).
pub fn group_file_name(position: usize, group_name: &str) -> String {
    format!("group_{:03}_{}.json", position + 1, slugify(&group_name.to_lowercase()))
}

fn is_group_file(name: &str) -> bool {
    name.starts_with("group_") && name.ends_with(".json")
}

/// Delete every `group_*.json` in `mod_dir`.
pub fn remove_group_files(mod_dir: &Path) -> ManifestResult<usize> {
    let entries = match std::fs::read_dir(mod_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(FsError::new("read_dir", mod_dir, e).into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| FsError::new("read_dir", mod_dir, e))?;
        let name = entry.file_name();
        if is_group_file(&name.to_string_lossy()) {
            cfs::remove_file(&entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Write the cover image.
pub fn write_cover(mod_dir: &Path, bytes: &[u8]) -> ManifestResult<()> {
    write_atomic(&mod_dir.join(COVER_FILE), bytes)?;
    Ok(())
}

fn write_json<T: Serialize>(mod_dir: &Path, file: &str, value: &T) -> ManifestResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| ManifestError::Serialize {
        file: file.to_string(),
        source,
    })?;
    write_atomic(&mod_dir.join(file), &json)?;
    Ok(())
}

/// Everything written into a mod directory for one materialization.
#[derive(Debug, Clone)]
pub struct ModPack {
    pub meta: ModMeta,
    pub default_mod: DefaultMod,
    /// Groups in write order.
    pub groups: Vec<GroupFile>,
    pub sidecar: ModManifest,
    /// Hard links the descriptors expect next to the stored files.
    pub ui_duplicates: Vec<UiDuplicate>,
}

impl ModPack {
    /// Number of files [`write`](Self::write) produces.
    pub fn file_count(&self) -> u32 {
        self.groups.len() as u32 + 3
    }

    /// Descriptor file names in write order.
    pub fn group_file_names(&self) -> Vec<String> {
        self.groups
            .iter()
            .enumerate()
            .map(|(i, g)| group_file_name(i, g.name()))
            .collect()
    }

    /// Write all descriptors, replacing any old group files. The sidecar
    /// goes last.
    pub fn write(&self, mod_dir: &Path, progress: &Progress) -> ManifestResult<()> {
        let removed = remove_group_files(mod_dir)?;
        tracing::debug!(dir = %mod_dir.display(), removed, "Removed old group files");

        write_json(mod_dir, META_FILE, &self.meta)?;
        progress.advance();
        write_json(mod_dir, DEFAULT_MOD_FILE, &self.default_mod)?;
        progress.advance();

        for (name, group) in self.group_file_names().iter().zip(&self.groups) {
            write_json(mod_dir, name, group)?;
            progress.advance();
        }

        self.sidecar.save(mod_dir)?;
        progress.advance();
        Ok(())
    }
}

/// Builds [`ModPack`]s.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    title_prefix: String,
    hide_default_variant: bool,
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self {
            title_prefix: "[ML] ".to_string(),
            hide_default_variant: true,
        }
    }
}

type OptionFiles = HashMap<(String, String), FileMap>;

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = prefix.into();
        self
    }

    pub fn with_hide_default_variant(mut self, hide: bool) -> Self {
        self.hide_default_variant = hide;
        self
    }

    /// Name the host shows for this mod.
    pub fn display_name(&self, info: &VersionInfo) -> String {
        self.compose_name(&info.package.name, &info.variant.name, info.variant.is_default)
    }

    /// Display name from a variant lookup, used when renaming directories.
    pub fn display_name_for_variant(&self, variant: &VariantSummary) -> String {
        self.compose_name(&variant.package_name, &variant.name, variant.is_default)
    }

    fn compose_name(&self, package: &str, variant: &str, is_default: bool) -> String {
        let mut name = format!("{}{}", self.title_prefix, package.replace('/', "-"));
        if !(self.hide_default_variant && is_default) {
            name.push_str(&format!(" ({})", variant.replace('/', "-")));
        }
        name
    }

    pub fn build(
        &self,
        info: &VersionInfo,
        selection: &OptionSelection,
        include_tags: bool,
    ) -> ManifestResult<ModPack> {
        let full_install = selection.covers_all(&info.groups);
        let now = Utc::now();

        let mut tags = if include_tags {
            info.package.tags.clone()
        } else {
            Vec::new()
        };
        if !full_install {
            tags.push(PARTIAL_INSTALL_TAG.to_string());
        }

        let meta = ModMeta {
            file_version: META_FILE_VERSION,
            name: self.display_name(info),
            author: info.package.author.clone(),
            description: info.package.description.clone(),
            version: info.version.clone(),
            website: info.package.website.clone(),
            mod_tags: tags,
            import_date: now.timestamp_millis(),
        };

        let (default_files, option_files) = collect_files(info)?;
        let default_option = info.default_option.clone().unwrap_or_default();
        let default_mod = DefaultMod {
            name: String::new(),
            priority: 0,
            files: default_files,
            file_swaps: default_option.file_swaps,
            manipulations: default_option.manipulations.iter().map(normalize_manipulation).collect(),
        };

        let mut ordered: Vec<((u32, u32), GroupFile)> = Vec::new();
        for group in &info.groups {
            ordered.extend(build_group(group, selection, &option_files));
        }
        ordered.sort_by_key(|(order, _)| *order);
        let mut default_mod = default_mod;
        let mut groups: Vec<GroupFile> = ordered.into_iter().map(|(_, g)| g).collect();
        let ui_duplicates = duplicate_ui_files(&mut default_mod, &mut groups);

        let sidecar = ModManifest {
            manifest_version: MANIFEST_VERSION,
            id: info.package.id,
            name: info.package.name.clone(),
            tagline: info.package.tagline.clone(),
            description: info.package.description.clone(),
            author: info.package.author.clone(),
            variant: info.variant.name.clone(),
            variant_id: info.variant.id,
            version: info.version.clone(),
            version_id: info.version_id,
            full_install,
            include_tags,
            selected_options: selection.clone(),
            mod_hash: info.mod_hash.clone(),
            import_date: Some(now),
        };

        Ok(ModPack {
            meta,
            default_mod,
            groups,
            sidecar,
            ui_duplicates,
        })
    }
}

/// Split the needed-file graph into default files and per-(group, option)
/// file maps.
fn collect_files(info: &VersionInfo) -> ManifestResult<(FileMap, OptionFiles)> {
    let mut defaults = FileMap::new();
    let mut options = OptionFiles::new();

    for (hash, destinations) in &info.needed_files.files {
        for dest in destinations {
            validate_game_path(&dest.game_path)?;
            let game_path = dest.game_path.clone();
            let target = content_path(hash, &game_path);
            match (&dest.group, &dest.option) {
                (None, _) => {
                    defaults.insert(game_path, target);
                }
                (Some(group), Some(option)) => {
                    options
                        .entry((group.clone(), option.clone()))
                        .or_default()
                        .insert(game_path, target);
                }
                (Some(group), None) => {
                    tracing::debug!(group = %group, path = %game_path, "Skipping destination without option");
                }
            }
        }
    }
    Ok((defaults, options))
}

/// Give every UI game path that shares a stored file with another UI game
/// path its own numbered name for that file. The host misbehaves when one
/// file backs several UI resources.
///
/// Only the default files and standard groups are considered, after option
/// filtering. Extensionless files are left alone.
fn duplicate_ui_files(default_mod: &mut DefaultMod, groups: &mut [GroupFile]) -> Vec<UiDuplicate> {
    let mut maps: Vec<&mut FileMap> = vec![&mut default_mod.files];
    for group in groups.iter_mut() {
        if let GroupFile::Single(g) | GroupFile::Multi(g) = group {
            maps.extend(g.options.iter_mut().map(|o| &mut o.files));
        }
    }

    let mut references: IndexMap<String, Vec<(usize, String)>> = IndexMap::new();
    for (index, files) in maps.iter().enumerate() {
        for (game_path, target) in files.iter() {
            if game_path.starts_with(UI_PREFIX) {
                references
                    .entry(target.clone())
                    .or_default()
                    .push((index, game_path.clone()));
            }
        }
    }

    let mut duplicates = Vec::new();
    for (target, refs) in references {
        if refs.len() < 2 {
            continue;
        }
        let Some((hash, extension)) = parse_content_path(&target) else {
            continue;
        };
        if extension.is_empty() {
            continue;
        }

        for (copy, (index, game_path)) in refs.iter().enumerate() {
            let name = ContentStore::duplicate_name(hash, extension, copy + 1);
            maps[*index].insert(game_path.clone(), format!("{}\\{}", FILES_DIR, name));
        }
        tracing::debug!(hash = %hash, copies = refs.len(), "Duplicating shared UI file");
        duplicates.push(UiDuplicate {
            hash: hash.to_string(),
            extension: extension.to_string(),
            copies: refs.len(),
        });
    }
    duplicates
}

fn option_item(group: &str, option: &OptionInfo, files: &OptionFiles) -> OptionItem {
    OptionItem {
        name: option.name.clone(),
        description: option.description.clone(),
        priority: option.priority,
        files: files
            .get(&(group.to_string(), option.name.clone()))
            .cloned()
            .unwrap_or_default(),
        file_swaps: option.file_swaps.clone(),
        manipulations: option.manipulations.iter().map(normalize_manipulation).collect(),
    }
}

fn imc_option(option: &ImcOptionInfo) -> ImcOption {
    ImcOption {
        name: option.name.clone(),
        description: option.description.clone(),
        is_disable_sub_mod: option.is_disable_sub_mod,
        attribute_mask: option.attribute_mask,
    }
}

fn container(group: &str, info: &ContainerInfo, files: &OptionFiles) -> CombiningContainer {
    CombiningContainer {
        name: Some(info.name.clone()),
        files: files
            .get(&(group.to_string(), info.name.clone()))
            .cloned()
            .unwrap_or_default(),
        file_swaps: info.file_swaps.clone(),
        manipulations: info.manipulations.iter().map(normalize_manipulation).collect(),
    }
}

/// Names whose bit is set in `mask`.
fn enabled_names<'a>(names: impl Iterator<Item = &'a str>, mask: u64) -> HashSet<String> {
    names
        .enumerate()
        .filter(|(i, _)| *i < 64 && mask & (1u64 << i) != 0)
        .map(|(_, n)| n.to_string())
        .collect()
}

/// Bitmask of `enabled` names over `names`.
fn mask_of<'a>(names: impl Iterator<Item = &'a str>, enabled: &HashSet<String>) -> u64 {
    names
        .enumerate()
        .filter(|(i, n)| *i < 64 && enabled.contains(*n))
        .fold(0, |mask, (i, _)| mask | (1u64 << i))
}

/// Keep only options in `selected`; `None` means the group was not selected
/// at all and loses every option.
fn retain_selected<T>(options: &mut Vec<T>, selected: Option<&indexmap::IndexSet<String>>, name: impl Fn(&T) -> &str) {
    match selected {
        Some(selected) => options.retain(|o| selected.contains(name(o))),
        None => options.clear(),
    }
}

fn build_group(
    group: &GroupInfo,
    selection: &OptionSelection,
    files: &OptionFiles,
) -> Vec<((u32, u32), GroupFile)> {
    let index = group.original_index;
    let selected = selection.options(&group.name);

    match &group.kind {
        GroupKind::Single { options } => {
            let mut items: Vec<OptionItem> =
                options.iter().map(|o| option_item(&group.name, o, files)).collect();
            let previous = usize::try_from(group.default_settings)
                .ok()
                .and_then(|i| items.get(i))
                .map(|o| o.name.clone());

            retain_selected(&mut items, selected, |o| o.name.as_str());
            let default_settings = previous
                .and_then(|name| items.iter().position(|o| o.name == name))
                .unwrap_or(0) as u64;

            vec![(
                (index, 0),
                GroupFile::Single(standard_group(group, default_settings, items)),
            )]
        }
        GroupKind::Multi { options } => {
            let mut items: Vec<OptionItem> =
                options.iter().map(|o| option_item(&group.name, o, files)).collect();
            let enabled = enabled_names(items.iter().map(|o| o.name.as_str()), group.default_settings);
            retain_selected(&mut items, selected, |o| o.name.as_str());

            if items.len() <= MULTI_GROUP_WIDTH {
                let mask = mask_of(items.iter().map(|o| o.name.as_str()), &enabled);
                return vec![((index, 0), GroupFile::Multi(standard_group(group, mask, items)))];
            }

            items
                .chunks(MULTI_GROUP_WIDTH)
                .enumerate()
                .map(|(part, chunk)| {
                    let mask = mask_of(chunk.iter().map(|o| o.name.as_str()), &enabled);
                    let mut split = standard_group(group, mask, chunk.to_vec());
                    split.name = format!("{}, Part {}", group.name, part + 1);
                    ((index, part as u32 + 1), GroupFile::Multi(split))
                })
                .collect()
        }
        GroupKind::Imc {
            options,
            identifier,
            default_entry,
            all_variants,
            only_attributes,
            can_be_disabled,
        } => {
            let mut items: Vec<ImcOption> = options.iter().map(imc_option).collect();
            let enabled = enabled_names(items.iter().map(|o| o.name.as_str()), group.default_settings);
            retain_selected(&mut items, selected, |o| o.name.as_str());
            let mask = mask_of(items.iter().map(|o| o.name.as_str()), &enabled);

            vec![(
                (index, 0),
                GroupFile::Imc(ImcGroup {
                    name: group.name.clone(),
                    description: group.description.clone(),
                    priority: group.priority,
                    default_settings: mask,
                    identifier: identifier.clone(),
                    all_variants: *all_variants,
                    only_attributes: *only_attributes,
                    can_be_disabled: *can_be_disabled,
                    default_entry: default_entry.clone(),
                    options: items,
                }),
            )]
        }
        GroupKind::Combining { options, containers } => {
            let kept = selected.is_some_and(|s| !s.is_empty());
            let combining = if kept {
                CombiningGroup {
                    name: group.name.clone(),
                    description: group.description.clone(),
                    priority: group.priority,
                    default_settings: group.default_settings,
                    options: options
                        .iter()
                        .map(|o| CombiningOption {
                            name: o.name.clone(),
                            description: o.description.clone(),
                        })
                        .collect(),
                    containers: containers.iter().map(|c| container(&group.name, c, files)).collect(),
                }
            } else {
                CombiningGroup {
                    name: group.name.clone(),
                    description: group.description.clone(),
                    priority: group.priority,
                    default_settings: 0,
                    options: Vec::new(),
                    containers: Vec::new(),
                }
            };
            vec![((index, 0), GroupFile::Combining(combining))]
        }
    }
}

fn standard_group(group: &GroupInfo, default_settings: u64, options: Vec<OptionItem>) -> StandardGroup {
    StandardGroup {
        name: group.name.clone(),
        description: group.description.clone(),
        priority: group.priority,
        default_settings,
        options,
    }
}
