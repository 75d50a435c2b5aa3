//! Attachment scanner: risky file types, spoofed names and MIME mismatches.
//!
//! Works on attachment metadata only; file contents are never inspected.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::errors::ToolError;
use super::types::{AnalysisTool, ToolContext, ToolName};
use crate::analysis::types::RiskLevel;

/// Executable and script extensions.
const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "scr", "bat", "cmd", "com", "pif", "vbs", "vbe", "js", "jse", "wsf", "wsh", "msi",
    "jar", "ps1", "hta", "lnk", "iso", "img", "reg", "cpl", "dll",
];

/// Office formats that can carry macros.
const MACRO_EXTENSIONS: &[&str] = &["docm", "xlsm", "pptm", "dotm", "xltm", "xlam", "potm", "ppsm"];

/// Filename words used to entice the recipient into opening the file.
const ENTICEMENT_KEYWORDS: &[&str] = &[
    "invoice",
    "receipt",
    "urgent",
    "confidential",
    "payment",
    "statement",
    "refund",
    "password",
    "salary",
    "bonus",
    "overdue",
    "shipping",
];

const MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// MIME types accepted for a given extension.
fn expected_mime_types(ext: &str) -> Option<&'static [&'static str]> {
    let types: &'static [&'static str] = match ext {
        "pdf" => &["application/pdf"],
        "doc" => &["application/msword"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "xls" => &["application/vnd.ms-excel"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        "ppt" => &["application/vnd.ms-powerpoint"],
        "pptx" => &["application/vnd.openxmlformats-officedocument.presentationml.presentation"],
        "zip" => &["application/zip", "application/x-zip-compressed"],
        "jpg" | "jpeg" => &["image/jpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        "txt" => &["text/plain"],
        "csv" => &["text/csv", "text/plain"],
        "html" | "htm" => &["text/html"],
        "exe" => &["application/x-msdownload", "application/x-dosexec"],
        _ => return None,
    };
    Some(types)
}

/// One attachment as described by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentInfo {
    pub filename: String,
    pub mime_type: Option<String>,
    /// Bytes; `None` when absent or unreadable.
    pub size: Option<u64>,
}

impl AttachmentInfo {
    /// Read an attachment object field by field.
    ///
    /// A malformed field becomes unknown instead of discarding the entry.
    fn from_object(obj: &Map<String, Value>) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };
        Self {
            filename: text(&["filename", "fileName", "name"]).unwrap_or_default(),
            mime_type: text(&["mimeType", "mime_type", "contentType"]),
            size: obj.get("size").and_then(size_from_value),
        }
    }
}

/// Byte count from an integer, a non-negative float or a numeric string.
fn size_from_value(value: &Value) -> Option<u64> {
    let from_float = |f: f64| (f.is_finite() && f >= 0.0).then_some(f as u64);
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(from_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        _ => None,
    }
}

/// Findings for one attachment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentFinding {
    pub filename: String,
    pub risk_level: RiskLevel,
    pub flags: Vec<String>,
}

/// Scan a single attachment.
pub fn scan_attachment(info: &AttachmentInfo) -> AttachmentFinding {
    let name = info.filename.trim().to_lowercase();
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_string())
        .unwrap_or_default();
    let mut flags = Vec::new();

    if DANGEROUS_EXTENSIONS.contains(&ext.as_str()) {
        flags.push(format!("executable or script file type '.{ext}'"));
    } else if MACRO_EXTENSIONS.contains(&ext.as_str()) {
        flags.push(format!("macro-enabled document type '.{ext}'"));
    }

    if name.matches('.').count() > 1 {
        flags.push("multiple extensions (possible double-extension spoofing)".to_string());
    }

    if let Some(keyword) = ENTICEMENT_KEYWORDS.iter().find(|k| name.contains(*k)) {
        flags.push(format!("enticing filename keyword '{keyword}'"));
    }

    if let (Some(mime), Some(expected)) = (&info.mime_type, expected_mime_types(&ext)) {
        let declared = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if !declared.is_empty() && !expected.contains(&declared.as_str()) {
            flags.push(format!(
                "declared MIME type '{declared}' does not match '.{ext}'"
            ));
        }
    }

    match info.size {
        Some(0) => flags.push("attachment is empty (0 bytes)".to_string()),
        Some(size) if size > MAX_SIZE_BYTES => {
            flags.push(format!("unusually large attachment ({size} bytes)"))
        }
        _ => {}
    }

    AttachmentFinding {
        filename: info.filename.clone(),
        risk_level: RiskLevel::from_flag_count(flags.len(), 1),
        flags,
    }
}

/// Scan a batch of attachments into the tool's result object.
pub fn scan_attachments(attachments: &[AttachmentInfo]) -> Value {
    let findings: Vec<AttachmentFinding> = attachments.iter().map(scan_attachment).collect();
    let risk = findings
        .iter()
        .map(|f| f.risk_level)
        .max()
        .unwrap_or(RiskLevel::Low);
    let features: Vec<String> = findings
        .iter()
        .flat_map(|f| f.flags.iter().map(move |flag| format!("{}: {flag}", f.filename)))
        .collect();

    let analysis = match findings.len() {
        0 => "No attachments were provided.".to_string(),
        n => format!("Scanned {n} attachment(s). Overall risk: {risk}."),
    };

    json!({
        "riskLevel": risk,
        "suspiciousFeatures": features,
        "analysis": analysis,
        "attachments": findings,
    })
}

/// Read the `attachments` argument; bare strings are taken as filenames and
/// entries that are neither are skipped.
fn attachment_list(args: &Value) -> Vec<AttachmentInfo> {
    let Some(items) = args.get("attachments").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(AttachmentInfo {
                filename: name.clone(),
                ..AttachmentInfo::default()
            }),
            Value::Object(obj) => Some(AttachmentInfo::from_object(obj)),
            _ => None,
        })
        .collect()
}

/// Tool wrapper around [`scan_attachments`].
pub struct AttachmentScanner;

#[async_trait]
impl AnalysisTool for AttachmentScanner {
    fn name(&self) -> ToolName {
        ToolName::AttachmentScanner
    }

    fn description(&self) -> &'static str {
        "Assess attachment metadata for dangerous or macro-enabled file types, \
         double extensions, enticing names, MIME mismatches and odd sizes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "attachments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "filename": {"type": "string"},
                            "mimeType": {"type": "string"},
                            "size": {"type": "integer", "description": "Size in bytes"}
                        },
                        "required": ["filename"]
                    }
                }
            },
            "required": ["attachments"]
        })
    }

    async fn invoke(&self, args: &Value, _ctx: ToolContext<'_>) -> Result<Value, ToolError> {
        Ok(scan_attachments(&attachment_list(args)))
    }
}
