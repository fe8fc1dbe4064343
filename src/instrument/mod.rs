//! Call-site instrumentation: redirect configured calls to static shim
//! methods and inject the shim modules into the archive.
//!
//! Replacement keeps every instruction at its original offset and length,
//! so branch targets, exception ranges, and stack map frames stay valid.
//! `invokeinterface` is five bytes long and becomes `invokestatic` followed
//! by two `nop`s. Constructor and super calls (`invokespecial`) are never
//! redirected.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use serde::Deserialize;

use crate::archive::{self, ArchiveEdit};
use crate::bytecode;
use crate::classfile::descriptor::{FieldType, MethodDescriptor, binary_name};
use crate::classfile::{Constant, Module};
use crate::error::{Error, Result};
use crate::ir::{CallKind, CallSite, InstructionKind};
use crate::opcodes;

mod shim;

pub use shim::{ForwardingShims, ShimDirectory, ShimMethod, ShimSource};

/// Calls to `owner.name descriptor` go to `shim_owner.shim_name` instead.
/// Class names may be written in binary (`java.lang.Runtime`) or internal
/// (`java/lang/Runtime`) form.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Redirect {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub shim_owner: String,
    pub shim_name: String,
}

impl Redirect {
    fn targets(&self, call: &CallSite) -> bool {
        call.kind != CallKind::Special
            && internal_name(&self.owner) == call.owner
            && self.name == call.name
            && self.descriptor == call.descriptor
    }
}

fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

pub struct Instrumentor {
    shims: Box<dyn ShimSource>,
    backup_dir: Option<PathBuf>,
}

impl Instrumentor {
    pub fn new(shims: impl ShimSource + 'static) -> Self {
        Self {
            shims: Box::new(shims),
            backup_dir: None,
        }
    }

    /// Backups default to a `backups` directory beside the archive.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Rewrites matching call sites in every module of the archive. Returns
    /// whether the archive was replaced.
    ///
    /// All rewrites and shims are prepared before anything is written: a
    /// `MissingShim` or `ShimConflict` leaves the archive untouched.
    pub fn instrument_calls(&self, path: &Path, redirects: &[Redirect]) -> Result<bool> {
        if redirects.is_empty() {
            return Ok(false);
        }
        let shim_owners: BTreeSet<String> = redirects
            .iter()
            .map(|redirect| internal_name(&redirect.shim_owner))
            .collect();

        let mut archive = archive::open_archive(path)?;
        let present: BTreeSet<String> = archive.file_names().map(str::to_string).collect();
        let mut edit = ArchiveEdit::default();
        let mut required: BTreeMap<String, BTreeSet<ShimMethod>> = BTreeMap::new();

        for index in 0..archive.len() {
            let Some((name, data)) = archive::read_module_entry(&mut archive, index, path)? else {
                continue;
            };
            if shim_owners.contains(name.trim_end_matches(".class")) {
                continue;
            }
            match redirect_module(&data, redirects) {
                Ok(Some((bytes, shims))) => {
                    tracing::debug!(entry = %name, shims = shims.len(), "call sites redirected");
                    for (owner, method) in shims {
                        required.entry(owner).or_default().insert(method);
                    }
                    edit.replaced.insert(index, bytes);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(archive = %path.display(), entry = %name, error = %err, "skipping module");
                }
            }
        }
        if edit.replaced.is_empty() {
            tracing::info!(archive = %path.display(), "no call sites to redirect");
            return Ok(false);
        }

        for (owner, methods) in &required {
            check_shim_conflicts(owner, methods)?;
        }
        for (owner, methods) in &required {
            let entry = format!("{owner}.class");
            if present.contains(&entry) {
                continue;
            }
            let methods: Vec<ShimMethod> = methods.iter().cloned().collect();
            let bytes = self.shims.shim_bytes(owner, &methods)?;
            edit.injected.push((entry, bytes));
        }

        let backup_dir = self.backup_dir.clone().unwrap_or_else(|| {
            path.parent()
                .map(|parent| parent.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups"))
        });
        match backup(path, &backup_dir) {
            Ok(copy) => tracing::debug!(backup = %copy.display(), "archive backed up"),
            Err(err) => tracing::warn!(archive = %path.display(), error = %err, "backup failed; continuing"),
        }

        archive::write_archive(path, &mut archive, &edit, |file| file)?;
        tracing::info!(
            archive = %path.display(),
            modules = edit.replaced.len(),
            injected = edit.injected.len(),
            "archive instrumented"
        );
        Ok(true)
    }
}

/// Rewritten bytes plus the shim methods they call, or `None` when no call
/// site matched.
fn redirect_module(
    data: &[u8],
    redirects: &[Redirect],
) -> Result<Option<(Vec<u8>, Vec<(String, ShimMethod)>)>> {
    let mut module = Module::parse(data)?;
    let mut shims = Vec::new();

    for position in 0..module.methods.len() {
        let Some(code) = module.methods[position].code() else {
            continue;
        };
        let mut patches = Vec::new();
        for instruction in bytecode::decode(&code.bytecode, &module.constant_pool)? {
            let InstructionKind::Invoke(call) = instruction.kind else {
                continue;
            };
            let Some(redirect) = redirects.iter().find(|redirect| redirect.targets(&call)) else {
                continue;
            };
            let method = shim_method(&module, redirect, &call)?;
            patches.push((instruction.offset as usize, call.kind, internal_name(&redirect.shim_owner), method));
        }
        if patches.is_empty() {
            continue;
        }

        let mut resolved = Vec::with_capacity(patches.len());
        for (offset, kind, owner, method) in patches {
            let index = module
                .constant_pool
                .intern_method_ref(&owner, &method.name, &method.descriptor)?;
            resolved.push((offset, kind, index));
            shims.push((owner, method));
        }
        let Some(code) = module.methods[position].code_mut() else {
            continue;
        };
        for (offset, kind, index) in resolved {
            let [high, low] = index.to_be_bytes();
            code.bytecode[offset..offset + 3].copy_from_slice(&[opcodes::INVOKESTATIC, high, low]);
            if kind == CallKind::Interface {
                code.bytecode[offset + 3..offset + 5].copy_from_slice(&[opcodes::NOP, opcodes::NOP]);
            }
        }
    }

    if shims.is_empty() {
        return Ok(None);
    }
    tracing::trace!(module = %module.binary_name()?, calls = shims.len(), "rewrote call sites");
    let bytes = module.to_bytes()?;
    crate::classfile::validate(&bytes)?;
    Ok(Some((bytes, shims)))
}

/// A shim class cannot hold two methods with the same name and descriptor.
fn check_shim_conflicts(owner: &str, methods: &BTreeSet<ShimMethod>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for method in methods {
        if !seen.insert((&method.name, &method.descriptor)) {
            return Err(Error::ShimConflict {
                owner: binary_name(owner),
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            });
        }
    }
    Ok(())
}

/// Static shim signature: instance calls gain the receiver as first argument.
fn shim_method(module: &Module, redirect: &Redirect, call: &CallSite) -> Result<ShimMethod> {
    let original = MethodDescriptor::parse(&call.descriptor)?;
    let descriptor = match call.kind {
        CallKind::Static => original,
        _ => original.with_receiver(FieldType::object(call.owner.clone())),
    };
    let target_is_interface = matches!(
        module.constant_pool.get(call.pool_index)?,
        Constant::InterfaceMethodRef { .. }
    );
    Ok(ShimMethod {
        name: redirect.shim_name.clone(),
        descriptor: descriptor.to_string(),
        target_owner: call.owner.clone(),
        target_name: call.name.clone(),
        target_descriptor: call.descriptor.clone(),
        target_kind: call.kind,
        target_is_interface,
    })
}

/// Copies the archive to `<dir>/<stem>-<YYYYMMDDHHMMSS>.<ext>`.
fn backup(path: &Path, dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let stamp = Local::now().format("%Y%m%d%H%M%S");
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{stamp}"),
    };
    let target = dir.join(name);
    std::fs::copy(path, &target)
        .with_context(|| format!("failed to copy {} to {}", path.display(), target.display()))?;
    Ok(target)
}

impl std::fmt::Display for Redirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}{} -> {}.{}",
            binary_name(&internal_name(&self.owner)),
            self.name,
            self.descriptor,
            binary_name(&internal_name(&self.shim_owner)),
            self.shim_name
        )
    }
}
