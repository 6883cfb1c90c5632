use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    json_abi::JsonAbi,
};
use alloy_primitives::{B256, Bytes, keccak256};
use serde::Deserialize;

use crate::create2::{self, FormatError};

#[derive(Debug, thiserror::Error)]
pub(super) enum ArtifactError {
    #[error("no artifact named `{name}` under {}", root.display())]
    NotFound { name: String, root: PathBuf },

    #[error("artifact `{name}` is ambiguous: {}", candidates.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<PathBuf>,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact `{name}` has unusable bytecode: {source}")]
    Bytecode {
        name: String,
        #[source]
        source: FormatError,
    },

    #[error("`{name}` takes {expected} constructor arguments, got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid constructor arguments for `{name}`: {source}")]
    Encoding {
        name: String,
        #[source]
        source: alloy::dyn_abi::Error,
    },

    #[error("no build info recorded next to {}", path.display())]
    MissingBuildInfo { path: PathBuf },
}

/// Compiled contract loaded from a Hardhat or Foundry artifact file.
#[derive(Debug, Clone)]
pub(super) struct Artifact {
    pub(super) contract_name: String,
    /// Source path the contract was compiled from, e.g. `contracts/Token.sol`.
    pub(super) source_name: Option<String>,
    pub(super) abi: JsonAbi,
    /// Creation bytecode without constructor arguments.
    pub(super) bytecode: Bytes,
    path: PathBuf,
}

/// Compiler invocation an artifact came from; what explorers need to verify.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BuildInfo {
    pub(super) solc_long_version: String,
    /// Standard JSON input handed to solc.
    pub(super) input: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    source_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    /// Hardhat stores the creation code as a plain hex string.
    Hex(String),
    /// Foundry nests it under `object`.
    Object { object: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: PathBuf,
}

/// Directory of compiled artifacts, looked up by contract name.
#[derive(Debug, Clone)]
pub(super) struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub(super) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Finds `<name>.json` anywhere below the root and decodes it.
    pub(super) fn load(&self, name: &str) -> Result<Artifact, ArtifactError> {
        let file_name = format!("{name}.json");
        let mut candidates = Vec::new();
        find_files(&self.root, &file_name, &mut candidates)?;

        let path = match candidates.len() {
            0 => {
                return Err(ArtifactError::NotFound {
                    name: name.to_owned(),
                    root: self.root.clone(),
                });
            }
            1 => candidates.remove(0),
            _ => {
                return Err(ArtifactError::Ambiguous {
                    name: name.to_owned(),
                    candidates,
                });
            }
        };

        let raw: RawArtifact = read_json(&path)?;
        let hex = match &raw.bytecode {
            RawBytecode::Hex(hex) | RawBytecode::Object { object: hex } => hex,
        };
        let bytecode = create2::decode_hex("bytecode", hex).map_err(|source| {
            ArtifactError::Bytecode {
                name: name.to_owned(),
                source,
            }
        })?;

        tracing::debug!(path = %path.display(), bytes = bytecode.len(), "loaded artifact");
        Ok(Artifact {
            contract_name: raw.contract_name.unwrap_or_else(|| name.to_owned()),
            source_name: raw.source_name,
            abi: raw.abi,
            bytecode: bytecode.into(),
            path,
        })
    }
}

impl Artifact {
    /// Reads the build info Hardhat links from `<name>.dbg.json`.
    pub(super) fn build_info(&self) -> Result<BuildInfo, ArtifactError> {
        let debug_path = self.path.with_extension("dbg.json");
        if !debug_path.is_file() {
            return Err(ArtifactError::MissingBuildInfo {
                path: self.path.clone(),
            });
        }
        let debug: DebugFile = read_json(&debug_path)?;
        let dir = debug_path.parent().unwrap_or_else(|| Path::new("."));
        read_json(&dir.join(debug.build_info))
    }
}

/// Contract creation code followed by its ABI-encoded constructor arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct InitCode {
    code: Bytes,
    constructor_args: Bytes,
}

impl InitCode {
    /// Encodes `args` against the artifact's constructor and appends them to
    /// its bytecode. Each argument is parsed according to its ABI type.
    pub(super) fn new(artifact: &Artifact, args: &[String]) -> Result<Self, ArtifactError> {
        let name = &artifact.contract_name;
        let Some(constructor) = artifact.abi.constructor() else {
            if !args.is_empty() {
                return Err(ArtifactError::ArgumentCount {
                    name: name.clone(),
                    expected: 0,
                    actual: args.len(),
                });
            }
            return Ok(Self::from_parts(artifact.bytecode.clone(), Bytes::new()));
        };

        if constructor.inputs.len() != args.len() {
            return Err(ArtifactError::ArgumentCount {
                name: name.clone(),
                expected: constructor.inputs.len(),
                actual: args.len(),
            });
        }

        let encoding = |source| ArtifactError::Encoding {
            name: name.clone(),
            source,
        };
        let values = constructor
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| param.resolve()?.coerce_str(arg))
            .collect::<Result<Vec<DynSolValue>, _>>()
            .map_err(encoding)?;
        let encoded = constructor.abi_encode_input(&values).map_err(encoding)?;

        Ok(Self::from_parts(artifact.bytecode.clone(), encoded.into()))
    }

    pub(super) fn from_parts(bytecode: Bytes, constructor_args: Bytes) -> Self {
        let code = bytecode
            .iter()
            .chain(constructor_args.iter())
            .copied()
            .collect();
        Self {
            code,
            constructor_args,
        }
    }

    pub(super) fn bytes(&self) -> &Bytes {
        &self.code
    }

    /// ABI-encoded constructor arguments alone, as explorers expect them.
    pub(super) fn constructor_args(&self) -> &Bytes {
        &self.constructor_args
    }

    pub(super) fn hash(&self) -> B256 {
        keccak256(&self.code)
    }
}

fn find_files(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) -> Result<(), ArtifactError> {
    let io = |source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|name| name == "build-info") {
                continue;
            }
            find_files(&path, file_name, found)?;
        } else if path.file_name().is_some_and(|name| name == file_name) {
            found.push(path);
        }
    }
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ArtifactError> {
    let raw = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })
}
