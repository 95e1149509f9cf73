//! Contract with the C runtime library that generated code links
//! against, and discovery of its sources on disk.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::CoreError;

// Constructors
pub const INT: &str = "NEO_int";
pub const DOUBLE: &str = "NEO_double";
pub const BIGINT_STR: &str = "NEO_bigint_str";
pub const BIGFLOAT_STR: &str = "NEO_bigfloat_str";
pub const STRING: &str = "NEO_string3";
pub const ARRAY: &str = "NEO_array";
pub const OBJECT: &str = "NEO_object";
pub const FUNCTION: &str = "NEO_function";

// Reference counting
pub const REFERENCE: &str = "NEO_reference";
pub const DEREFERENCE: &str = "NEO_dereference";

// Operators; binary operators are `OPERATOR_PREFIX` + name.
pub const OPERATOR_PREFIX: &str = "NEO_";
pub const NOT: &str = "NEO_not";
pub const BIT_NOT: &str = "NEO_bit_not";
pub const NEGATE: &str = "NEO_negate";

// Object protocol
pub const GET_PROPERTY: &str = "NEO_get_object_property";
pub const SET_PROPERTY: &str = "NEO_set_object_property";
pub const CALL_PROPERTY: &str = "NEO_call_object_property";
pub const CALL: &str = "NEO_call";
pub const ARRAY_PUSH: &str = "internal_NEO_array_push";

// Keyword argument maps
pub const CREATE_HASHMAP: &str = "NEO_create_hashmap";
pub const HASHMAP_SET: &str = "NEO_hashmap_set";
pub const HASHMAP_SEARCH: &str = "NEO_hashmap_search";
pub const FREE_HASHMAP: &str = "NEO_free_hashmap";
pub const EMPTY_HASHMAP: &str = "NeoEmptyHashmap";

pub const TRUTHY: &str = "NEO_get_truthy";
pub const TO_STRING: &str = "NEO_to_string";

// Lifecycle
pub const INIT: &str = "NEO_init";
pub const EXIT: &str = "NEO_exit";
pub const INIT_FUNCTIONS: &str = "NEO_initFunctions";
pub const FREE_FUNCTIONS: &str = "NEO_freeFunctions";

pub const TRUE: &str = "NeoTrue";
pub const FALSE: &str = "NeoFalse";

/// Parameter list shared by every generated function.
pub const FUNCTION_PARAMETERS: &str =
    "NeoObject *this, NeoObject **args, size_t arg_count, NeoHashMap *kwargs";

pub const DEFAULT_HEADER: &str = "neo.h";

/// Libraries the runtime needs at link time.
pub const LINK_LIBRARIES: &[&str] = &["gmp", "mpfr", "m"];

/// On-disk layout of a runtime checkout: `include/neo.h` plus the C
/// sources that are compiled together with the generated unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub root: PathBuf,
    pub include_dir: PathBuf,
    pub sources: Vec<PathBuf>,
}

pub fn default_runtime_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../runtime")
}

impl RuntimeLayout {
    pub fn discover(root: impl AsRef<Path>) -> Result<RuntimeLayout, CoreError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(CoreError::MissingRuntime(root.to_path_buf()));
        }

        let include_dir = root.join("include");
        let header = include_dir.join(DEFAULT_HEADER);
        if !header.is_file() {
            return Err(CoreError::MissingRuntimeHeader(header));
        }

        let mut sources = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| CoreError::SourceIo(err.into()))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "c") {
                sources.push(path.to_path_buf());
            }
        }

        Ok(RuntimeLayout {
            root: root.to_path_buf(),
            include_dir,
            sources,
        })
    }
}
