//! Classification of Drive content types into download or export transfers.

/// Prefix shared by all Google editor content types.
pub const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

/// Target format for an exported Google editor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

/// Google editor types that can be exported, and what they export to.
pub const EXPORT_MIME_TABLE: [(&str, ExportFormat); 3] = [
    (
        "application/vnd.google-apps.document",
        ExportFormat {
            mime_type: "application/pdf",
            extension: "pdf",
        },
    ),
    (
        "application/vnd.google-apps.spreadsheet",
        ExportFormat {
            mime_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            extension: "xlsx",
        },
    ),
    (
        "application/vnd.google-apps.presentation",
        ExportFormat {
            mime_type: "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            extension: "pptx",
        },
    ),
];

/// How a listed file has to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    /// Byte-for-byte download of the stored content.
    Download,
    /// Server-side conversion of a Google editor file.
    Export(ExportFormat),
    /// A Google editor type with no export format (folders, drawings, forms...).
    Unsupported,
}

/// Look up the export format for a Google editor content type.
pub fn export_format(mime_type: &str) -> Option<ExportFormat> {
    EXPORT_MIME_TABLE
        .iter()
        .find(|(source, _)| *source == mime_type)
        .map(|(_, format)| *format)
}

/// Decide how to fetch a file with the given content type.
pub fn classify(mime_type: &str) -> TransferPlan {
    if !mime_type.starts_with(GOOGLE_APPS_PREFIX) {
        return TransferPlan::Download;
    }
    match export_format(mime_type) {
        Some(format) => TransferPlan::Export(format),
        None => TransferPlan::Unsupported,
    }
}

/// Name of the file as delivered to the chat.
///
/// Exported files always carry the export extension.
pub fn delivered_name(name: &str, plan: TransferPlan) -> String {
    match plan {
        TransferPlan::Export(format) => {
            let suffix = format!(".{}", format.extension);
            if name.to_ascii_lowercase().ends_with(&suffix) {
                name.to_string()
            } else {
                format!("{}{}", name, suffix)
            }
        }
        TransferPlan::Download | TransferPlan::Unsupported => name.to_string(),
    }
}
