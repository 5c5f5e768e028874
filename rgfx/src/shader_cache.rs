//! On-disk SPIR-V cache keyed by source path and macro assignment.
//!
//! `shaders/basic.frag` compiled with `HAS_TEXTURE=1` lands at
//! `<cache_dir>/basic.frag.HAS_TEXTURE-1.spv`. Sources in subdirectories of
//! the source dir keep their relative path under the cache dir. A cached
//! file is reused while it is at least as new as its source.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;

use crate::device::Device;
use crate::shader::{
    CreateShaderModuleError, MacroLimit, ShaderMacro, ShaderModule, ShaderStage, spirv_words,
};

/// Suffix used when a shader is compiled with no macros.
pub const NO_MACROS_SUFFIX: &str = "default";

#[derive(Debug, Error)]
pub enum CompileShaderError {
    #[error("Shader source {0} does not exist")]
    SourceMissing(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to run shader compiler {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Compiling {path} failed:\n{diagnostics}")]
    Compiler { path: PathBuf, diagnostics: String },
    #[error("Compiled shader {path} is not valid SPIR-V: {source}")]
    InvalidSpirv {
        path: PathBuf,
        #[source]
        source: CreateShaderModuleError,
    },
}

#[derive(Debug, Error)]
pub enum LoadShaderModuleError {
    #[error(transparent)]
    Compile(#[from] CompileShaderError),
    #[error(transparent)]
    Module(#[from] CreateShaderModuleError),
}

/// Turns one GLSL source into a SPIR-V file.
pub trait ShaderCompiler {
    fn compile(
        &self,
        stage: ShaderStage,
        source: &Path,
        output: &Path,
        macros: &[ShaderMacro],
    ) -> Result<(), CompileShaderError>;
}

/// Runs `glslangValidator` (or a compatible executable).
#[derive(Debug, Clone)]
pub struct GlslangCompiler {
    executable: PathBuf,
}

impl GlslangCompiler {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Default for GlslangCompiler {
    fn default() -> Self {
        Self::new("glslangValidator")
    }
}

impl ShaderCompiler for GlslangCompiler {
    fn compile(
        &self,
        stage: ShaderStage,
        source: &Path,
        output: &Path,
        macros: &[ShaderMacro],
    ) -> Result<(), CompileShaderError> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-V").args(["-S", stage.extension()]);
        for m in macros {
            cmd.arg(format!("-D{}={}", m.name, m.value));
        }
        cmd.arg("-o").arg(output).arg(source);

        tracing::info!("Compiling {} -> {}", source.display(), output.display());
        let result = cmd.output().map_err(|source| CompileShaderError::Spawn {
            executable: self.executable.clone(),
            source,
        })?;
        if result.status.success() {
            return Ok(());
        }

        let mut diagnostics = String::from_utf8_lossy(&result.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&result.stderr));
        for line in diagnostics.lines().filter(|l| !l.trim().is_empty()) {
            tracing::error!("{line}");
        }
        Err(CompileShaderError::Compiler {
            path: source.to_path_buf(),
            diagnostics,
        })
    }
}

/// `HAS_TEXTURE-1.HAS_NORMAL-0`, or [`NO_MACROS_SUFFIX`] with no macros.
pub fn macro_suffix(macros: &[ShaderMacro]) -> String {
    if macros.is_empty() {
        return NO_MACROS_SUFFIX.to_owned();
    }
    macros
        .iter()
        .map(|m| format!("{}-{}", m.name, m.value))
        .collect::<Vec<_>>()
        .join(".")
}

/// True when `dst` exists and is not older than `src`.
pub fn is_up_to_date(src: &Path, dst: &Path) -> bool {
    let Ok(src_mtime) = src.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let Ok(dst_mtime) = dst.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    src_mtime <= dst_mtime
}

/// Macro limits declared in a shader source with `// @macro NAME MAX`
/// lines. Malformed declarations are skipped with a warning.
pub fn declared_macros(source: &str) -> Vec<MacroLimit> {
    let mut limits: Vec<MacroLimit> = Vec::new();
    for line in source.lines() {
        let Some(decl) = line.trim().strip_prefix("// @macro") else {
            continue;
        };
        let mut parts = decl.split_whitespace();
        match (parts.next(), parts.next().map(str::parse::<u32>), parts.next()) {
            (Some(name), Some(Ok(max_value)), None) => {
                if limits.iter().any(|l| l.name == name) {
                    tracing::warn!("Macro {name} declared twice; keeping the first");
                } else {
                    limits.push(MacroLimit::new(name, max_value));
                }
            }
            _ => tracing::warn!("Ignoring malformed macro declaration: {}", line.trim()),
        }
    }
    limits
}

#[derive(Debug)]
pub struct ShaderCache<C = GlslangCompiler> {
    source_dir: PathBuf,
    cache_dir: PathBuf,
    compiler: C,
}

impl<C: ShaderCompiler> ShaderCache<C> {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        compiler: C,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            cache_dir: cache_dir.into(),
            compiler,
        }
    }

    /// Relative paths resolve against the source dir.
    pub fn source_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_dir.join(path)
        }
    }

    /// Where the SPIR-V for `path` with `macros` is cached.
    pub fn spirv_path(&self, path: &Path, macros: &[ShaderMacro]) -> PathBuf {
        let source = self.source_path(path);
        let relative = source
            .strip_prefix(&self.source_dir)
            .ok()
            .and_then(Path::parent)
            .unwrap_or(Path::new(""));
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.cache_dir
            .join(relative)
            .join(format!("{file_name}.{}.spv", macro_suffix(macros)))
    }

    /// Return the SPIR-V words for `path` compiled with `macros`,
    /// recompiling when the cached file is missing or stale.
    pub fn load(
        &self,
        stage: ShaderStage,
        path: &Path,
        macros: &[ShaderMacro],
    ) -> Result<Vec<u32>, CompileShaderError> {
        let source = self.source_path(path);
        if !source.is_file() {
            return Err(CompileShaderError::SourceMissing(source));
        }
        let spirv = self.spirv_path(path, macros);

        if is_up_to_date(&source, &spirv) {
            tracing::debug!("Shader cache hit: {}", spirv.display());
        } else {
            if let Some(dir) = spirv.parent() {
                fs::create_dir_all(dir).map_err(|source| CompileShaderError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
            self.compiler.compile(stage, &source, &spirv, macros)?;
        }

        let bytes = fs::read(&spirv).map_err(|source| CompileShaderError::Io {
            path: spirv.clone(),
            source,
        })?;
        spirv_words(&bytes).map_err(|source| CompileShaderError::InvalidSpirv {
            path: spirv,
            source,
        })
    }

    /// [`load`](Self::load) and wrap the words in a [`ShaderModule`].
    pub fn load_module(
        &self,
        device: &Arc<Device>,
        stage: ShaderStage,
        path: &Path,
        macros: &[ShaderMacro],
    ) -> Result<ShaderModule, LoadShaderModuleError> {
        let words = self.load(stage, path, macros)?;
        let name = format!("{} [{}]", path.display(), macro_suffix(macros));
        Ok(ShaderModule::new(device, stage, &words, Some(&name))?)
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::shader::macros;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
    }

    impl ShaderCompiler for CountingCompiler {
        fn compile(
            &self,
            _stage: ShaderStage,
            _source: &Path,
            output: &Path,
            macros: &[ShaderMacro],
        ) -> Result<(), CompileShaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let words: Vec<u32> = std::iter::once(SPIRV_MAGIC)
                .chain(macros.iter().map(|m| m.value))
                .collect();
            fs::write(output, bytemuck::cast_slice::<u32, u8>(&words)).map_err(|source| {
                CompileShaderError::Io {
                    path: output.to_path_buf(),
                    source,
                }
            })
        }
    }

    struct FailingCompiler;

    impl ShaderCompiler for FailingCompiler {
        fn compile(
            &self,
            _stage: ShaderStage,
            source: &Path,
            _output: &Path,
            _macros: &[ShaderMacro],
        ) -> Result<(), CompileShaderError> {
            Err(CompileShaderError::Compiler {
                path: source.to_path_buf(),
                diagnostics: "ERROR: 0:1: syntax error".to_owned(),
            })
        }
    }

    fn cache_with_source<C: ShaderCompiler>(
        compiler: C,
    ) -> (tempfile::TempDir, ShaderCache<C>) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shaders");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("basic.frag"), "#version 450\nvoid main() {}\n").unwrap();
        let cache = ShaderCache::new(src, dir.path().join("cache"), compiler);
        (dir, cache)
    }

    #[test]
    fn cold_cache_compiles_once_then_loads() {
        let (_dir, cache) = cache_with_source(CountingCompiler::default());
        let path = Path::new("basic.frag");
        let textured = [ShaderMacro::new(macros::HAS_TEXTURE, 1)];

        let first = cache.load(ShaderStage::Fragment, path, &textured).unwrap();
        assert_eq!(cache.compiler().calls.load(Ordering::SeqCst), 1);
        assert!(cache.spirv_path(path, &textured).is_file());
        assert_eq!(first, [SPIRV_MAGIC, 1]);

        let second = cache.load(ShaderStage::Fragment, path, &textured).unwrap();
        assert_eq!(cache.compiler().calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);

        // The other value of the macro is a separate cache entry.
        let plain = [ShaderMacro::new(macros::HAS_TEXTURE, 0)];
        assert_eq!(
            cache.load(ShaderStage::Fragment, path, &plain).unwrap(),
            [SPIRV_MAGIC, 0]
        );
        assert_eq!(cache.compiler().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn newer_source_triggers_recompile() {
        let (_dir, cache) = cache_with_source(CountingCompiler::default());
        let path = Path::new("basic.frag");
        cache.load(ShaderStage::Fragment, path, &[]).unwrap();

        let spirv = cache.spirv_path(path, &[]);
        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1);
        fs::File::options()
            .write(true)
            .open(&spirv)
            .unwrap()
            .set_modified(old)
            .unwrap();

        cache.load(ShaderStage::Fragment, path, &[]).unwrap();
        assert_eq!(cache.compiler().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn spirv_path_mirrors_source_layout() {
        let cache = ShaderCache::new("/src", "/cache", CountingCompiler::default());
        let macros = [
            ShaderMacro::new(macros::HAS_TEXTURE, 1),
            ShaderMacro::new(macros::HAS_NORMAL, 0),
        ];
        assert_eq!(
            cache.spirv_path(Path::new("mesh/basic.vert"), &macros),
            Path::new("/cache/mesh/basic.vert.HAS_TEXTURE-1.HAS_NORMAL-0.spv")
        );
        assert_eq!(
            cache.spirv_path(Path::new("basic.frag"), &[]),
            Path::new("/cache/basic.frag.default.spv")
        );
    }

    #[test]
    fn missing_source_and_compiler_errors_surface() {
        let (_dir, cache) = cache_with_source(FailingCompiler);
        assert!(matches!(
            cache.load(ShaderStage::Vertex, Path::new("absent.vert"), &[]),
            Err(CompileShaderError::SourceMissing(_))
        ));
        let err = cache
            .load(ShaderStage::Fragment, Path::new("basic.frag"), &[])
            .unwrap_err();
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn macro_declarations_are_read_from_comments() {
        let source = "#version 450\n\
                      // @macro HAS_TEXTURE 1\n\
                      //   @macro ignored 1\n\
                      // @macro LIGHTS 3\n\
                      // @macro BROKEN x\n\
                      // @macro HAS_TEXTURE 2\n\
                      void main() {}\n";
        assert_eq!(
            declared_macros(source),
            [MacroLimit::new("HAS_TEXTURE", 1), MacroLimit::new("LIGHTS", 3)]
        );
    }
}
