//! Company logos embedded inline in HTML email.

use std::path::Path;

use alerts_core::config::BrandingConfig;

pub const COMPANY_LOGO_CID: &str = "company_logo";
pub const ST_COMPANY_LOGO_CID: &str = "st_company_logo";

/// An image ready to attach as an inline MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logo {
    pub content_id: &'static str,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// MIME type from the file extension; unknown extensions are treated as PNG.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "image/png",
    }
}

/// Read a logo file. Missing or unreadable files are logged and skipped.
pub fn load_logo(path: &Path, content_id: &'static str) -> Option<Logo> {
    if !path.is_file() {
        tracing::warn!("Logo not found at: {}", path.display());
        return None;
    }
    match std::fs::read(path) {
        Ok(bytes) => Some(Logo {
            content_id,
            mime_type: mime_for(path),
            bytes,
        }),
        Err(e) => {
            tracing::warn!("Failed to load logo from {}: {e}", path.display());
            None
        }
    }
}

/// The logos configured for branding, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct LogoSet {
    pub company: Option<Logo>,
    pub st_company: Option<Logo>,
}

impl LogoSet {
    pub fn load(branding: &BrandingConfig) -> Self {
        Self {
            company: branding
                .company_logo_path()
                .and_then(|p| load_logo(&p, COMPANY_LOGO_CID)),
            st_company: branding
                .st_company_logo_path()
                .and_then(|p| load_logo(&p, ST_COMPANY_LOGO_CID)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Logo> {
        self.company.iter().chain(self.st_company.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.company.is_none() && self.st_company.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_for(Path::new("logo.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("logo.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("logo.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("logo.gif")), "image/gif");
        assert_eq!(mime_for(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(mime_for(Path::new("logo.bmp")), "image/png");
        assert_eq!(mime_for(Path::new("logo")), "image/png");
    }

    #[test]
    fn test_missing_logo_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_logo(&dir.path().join("nope.png"), COMPANY_LOGO_CID).is_none());
    }

    #[test]
    fn test_logo_set_loads_existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("trans_logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

        let branding = BrandingConfig {
            media_dir: dir.path().display().to_string(),
            company_logo: Some("trans_logo.png".into()),
            st_company_logo: Some("missing.jpg".into()),
            ..Default::default()
        };
        let logos = LogoSet::load(&branding);

        let company = logos.company.as_ref().unwrap();
        assert_eq!(company.content_id, "company_logo");
        assert_eq!(company.mime_type, "image/png");
        assert_eq!(company.bytes.len(), 4);
        assert!(logos.st_company.is_none());
        assert_eq!(logos.iter().count(), 1);
    }
}
