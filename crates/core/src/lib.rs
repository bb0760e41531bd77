mod config;
mod discovery;
mod exif_reader;
mod extractor;
mod index;
mod rename;
mod sanitize;
mod sync;
mod tags;
mod template;
mod tool;

pub const DEFAULT_TEMPLATE: &str = "img_{counter:03}{ext}";
pub const DEFAULT_INDEX_PATH: &str = "public/photos.json";
pub const DEFAULT_PATH_PREFIX: &str = "content/";

pub use config::{
    app_paths, load_config, load_config_from, save_config, save_config_to, AppConfig, AppPaths,
    MetadataBackend,
};
pub use discovery::{
    collect_all_images, collect_images, dedupe_case_insensitive, is_image, IMAGE_EXTENSIONS,
};
pub use exif_reader::NativeExifReader;
pub use extractor::{
    build_record, extract_index, extract_to, photo_id, ExtractOptions, ExtractReport,
    SkippedImage,
};
pub use index::{
    read_index, scalar_text, write_index, IndexError, IndexMetadata, PhotoIndex, PhotoRecord, GENERATOR_NAME,
};
pub use rename::{
    new_run_tag, quarantine_path, Quarantine, QuarantineError, RenameFs, StageState,
    StagedRename, StdFs, QUARANTINE_PREFIX,
};
pub use sanitize::sanitize_filename;
pub use sync::{
    apply_sync, apply_sync_with, plan_sync, undo_sync, undo_sync_with, FailedCommit,
    RenameEntry, SyncCandidate, SyncError, SyncOptions, SyncPlan, SyncReport, UndoReport,
    BACKUP_DIR_NAME, BACKUP_FILE_NAME, MAPPING_FILE_NAME,
};
pub use tags::{extract_tags, split_tag_string, TAG_DELIMITERS, TAG_FIELDS};
pub use template::{
    normalize_date, parse_template, render_template, validate_template, RenderContext,
    TemplateError, TemplatePart, Token,
};
pub use tool::{
    parse_tool_output, ExiftoolCommand, FieldMap, MetadataTool, ToolError, DEFAULT_TOOL_TIMEOUT,
};
