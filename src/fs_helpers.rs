//! Filesystem helpers injected into every session's namespace: spec §4.2.
//!
//! Each function below resolves its path argument against the *calling
//! session's* virtual working directory, read from the `Evaluator`'s `extra`
//! context pointer (set to a `&FsContext` for the duration of one
//! `evaluate` call, see `engine.rs`) rather than the process's real cwd.
//! One `Globals` built from [`filesystem_helpers`] is shared by every
//! session; nothing here is per-session except the `extra` pointer.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use chrono::{DateTime, Local};
use starlark::environment::GlobalsBuilder;
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::values::none::NoneType;
use starlark::values::Value;

use crate::fs_context::FsContext;

fn current_context<'v, 'a>(eval: &Evaluator<'v, 'a>) -> anyhow::Result<&'a FsContext> {
    eval.extra
        .and_then(|extra| extra.downcast_ref::<FsContext>())
        .context("filesystem helper invoked outside of a session context")
}

fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let home = || std::env::var_os("HOME").map(PathBuf::from).context("HOME is not set");
    if path == "~" {
        return home();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return Ok(home()?.join(rest));
    }
    Ok(PathBuf::from(path))
}

/// Resolves `path` against `workdir`: absolute paths are used as-is,
/// relative paths are joined to the session's virtual workdir. Does not
/// require the target to exist.
fn resolve(workdir: &Path, path: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_home(path)?;
    Ok(if expanded.is_absolute() {
        expanded
    } else {
        workdir.join(expanded)
    })
}

/// Resolves and canonicalizes; fails if the target doesn't exist.
fn resolve_existing(ctx: &FsContext, path: &str) -> anyhow::Result<PathBuf> {
    let target = resolve(&ctx.get(), path)?;
    target
        .canonicalize()
        .with_context(|| format!("path not found: {path}"))
}

fn format_mtime(meta: &fs::Metadata) -> String {
    match meta.modified() {
        Ok(time) => {
            let datetime: DateTime<Local> = DateTime::<Local>::from(time);
            datetime.format("%Y-%m-%d %H:%M").to_string()
        }
        Err(_) => "????-??-?? ??:??".to_string(),
    }
}

fn long_entry_line(path: &Path, name: &str) -> anyhow::Result<String> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("{} not found", path.display()))?;
    let kind = if meta.is_dir() { 'd' } else { 'f' };
    let size = meta.len();
    let mtime = format_mtime(&meta);
    Ok(format!("{kind} {size:>10} {mtime} {name}"))
}

fn read_lines_head(content: &str, n: i32) -> String {
    content.split_inclusive('\n').take(n.max(0) as usize).collect()
}

fn read_lines_tail(content: &str, n: i32) -> String {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let n = n.max(0) as usize;
    let skip = lines.len().saturating_sub(n);
    lines[skip..].concat()
}

fn copy_recursive(src: &Path, dst: &Path) -> anyhow::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
    }
    Ok(())
}

#[starlark_module]
pub fn filesystem_helpers(builder: &mut GlobalsBuilder) {
    fn cd<'v>(
        #[starlark(default = "~")] path: &str,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<String> {
        let ctx = current_context(eval)?;
        let target = resolve(&ctx.get(), path)?;
        let canonical = target
            .canonicalize()
            .map_err(|_| anyhow::anyhow!("directory not found: {path}"))?;
        if !canonical.is_dir() {
            bail!("directory not found: {path}");
        }
        ctx.set(canonical.clone());
        Ok(canonical.display().to_string())
    }

    fn pwd<'v>(eval: &mut Evaluator<'v, '_>) -> anyhow::Result<String> {
        let ctx = current_context(eval)?;
        Ok(ctx.get().display().to_string())
    }

    fn ls<'v>(
        #[starlark(default = ".")] path: &str,
        #[starlark(default = false)] all: bool,
        #[starlark(default = false)] long: bool,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<Value<'v>> {
        let ctx = current_context(eval)?;
        let target = resolve_existing(ctx, path)?;

        let mut entries: Vec<(String, PathBuf, bool)> = if target.is_dir() {
            fs::read_dir(&target)?
                .map(|e| {
                    let e = e?;
                    let path = e.path();
                    let is_dir = path.is_dir();
                    Ok((e.file_name().to_string_lossy().into_owned(), path, is_dir))
                })
                .collect::<anyhow::Result<_>>()?
        } else {
            let name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            vec![(name, target.clone(), false)]
        };

        if !all {
            entries.retain(|(name, _, _)| !name.starts_with('.'));
        }
        entries.sort_by(|(a, _, a_dir), (b, _, b_dir)| {
            (!a_dir)
                .cmp(&!b_dir)
                .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        });

        let heap = eval.heap();
        if long {
            let mut lines = Vec::with_capacity(entries.len());
            for (name, full, _) in &entries {
                lines.push(long_entry_line(full, name)?);
            }
            return Ok(heap.alloc_str(&lines.join("\n")).to_value());
        }

        let names: Vec<Value<'v>> = entries
            .into_iter()
            .map(|(name, _, is_dir)| {
                let suffixed = if is_dir { format!("{name}/") } else { name };
                heap.alloc_str(&suffixed).to_value()
            })
            .collect();
        Ok(heap.alloc(names))
    }

    fn cat<'v>(
        path: &str,
        #[starlark(default = "utf-8")] encoding: &str,
        #[starlark(default = None)] head: Option<i32>,
        #[starlark(default = None)] tail: Option<i32>,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<String> {
        let _ = encoding; // only utf-8 is supported; accepted for call-shape parity
        let ctx = current_context(eval)?;
        let target = resolve_existing(ctx, path)?;
        if target.is_dir() {
            bail!("{path} is a directory");
        }
        let content = fs::read_to_string(&target).with_context(|| format!("could not read {path}"))?;

        if let Some(n) = head {
            return Ok(read_lines_head(&content, n));
        }
        if let Some(n) = tail {
            return Ok(read_lines_tail(&content, n));
        }
        Ok(content)
    }

    fn mkdir<'v>(
        path: &str,
        #[starlark(default = true)] parents: bool,
        #[starlark(default = true)] exist_ok: bool,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<NoneType> {
        let ctx = current_context(eval)?;
        let target = resolve(&ctx.get(), path)?;
        if target.is_dir() {
            if exist_ok {
                return Ok(NoneType);
            }
            bail!("{path} already exists");
        }
        if parents {
            fs::create_dir_all(&target)?;
        } else {
            fs::create_dir(&target)?;
        }
        Ok(NoneType)
    }

    fn touch<'v>(path: &str, eval: &mut Evaluator<'v, '_>) -> anyhow::Result<NoneType> {
        let ctx = current_context(eval)?;
        let target = resolve(&ctx.get(), path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if target.exists() {
            let now = filetime::FileTime::now();
            filetime::set_file_mtime(&target, now)?;
        } else {
            fs::File::create(&target)?;
        }
        Ok(NoneType)
    }

    fn rm<'v>(
        path: &str,
        #[starlark(default = false)] recursive: bool,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<NoneType> {
        let ctx = current_context(eval)?;
        let target = resolve_existing(ctx, path)?;
        if target.is_dir() {
            if recursive {
                fs::remove_dir_all(&target)?;
            } else {
                fs::remove_dir(&target).with_context(|| format!("{path} is not empty; use recursive=True"))?;
            }
        } else {
            fs::remove_file(&target)?;
        }
        Ok(NoneType)
    }

    fn cp<'v>(src: &str, dst: &str, eval: &mut Evaluator<'v, '_>) -> anyhow::Result<NoneType> {
        let ctx = current_context(eval)?;
        let src_path = resolve_existing(ctx, src)?;
        let dst_path = resolve(&ctx.get(), dst)?;
        copy_recursive(&src_path, &dst_path)?;
        Ok(NoneType)
    }

    fn mv<'v>(src: &str, dst: &str, eval: &mut Evaluator<'v, '_>) -> anyhow::Result<NoneType> {
        let ctx = current_context(eval)?;
        let src_path = resolve_existing(ctx, src)?;
        let dst_path = resolve(&ctx.get(), dst)?;
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(&src_path, &dst_path) {
            Ok(()) => Ok(NoneType),
            Err(_) => {
                copy_recursive(&src_path, &dst_path)?;
                if src_path.is_dir() {
                    fs::remove_dir_all(&src_path)?;
                } else {
                    fs::remove_file(&src_path)?;
                }
                Ok(NoneType)
            }
        }
    }

    fn write<'v>(
        path: &str,
        content: &str,
        #[starlark(default = "utf-8")] encoding: &str,
        #[starlark(default = false)] append: bool,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<NoneType> {
        let _ = encoding;
        let ctx = current_context(eval)?;
        let target = resolve(&ctx.get(), path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        use std::io::Write as _;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&target)?;
        file.write_all(content.as_bytes())?;
        Ok(NoneType)
    }

    fn exists<'v>(path: &str, eval: &mut Evaluator<'v, '_>) -> anyhow::Result<bool> {
        let ctx = current_context(eval)?;
        Ok(resolve(&ctx.get(), path)?.exists())
    }

    fn isfile<'v>(path: &str, eval: &mut Evaluator<'v, '_>) -> anyhow::Result<bool> {
        let ctx = current_context(eval)?;
        Ok(resolve(&ctx.get(), path)?.is_file())
    }

    fn isdir<'v>(path: &str, eval: &mut Evaluator<'v, '_>) -> anyhow::Result<bool> {
        let ctx = current_context(eval)?;
        Ok(resolve(&ctx.get(), path)?.is_dir())
    }

    fn abspath<'v>(path: &str, eval: &mut Evaluator<'v, '_>) -> anyhow::Result<String> {
        let ctx = current_context(eval)?;
        let target = resolve(&ctx.get(), path)?;
        match target.canonicalize() {
            Ok(canonical) => Ok(canonical.display().to_string()),
            Err(_) => Ok(target.display().to_string()),
        }
    }
}
