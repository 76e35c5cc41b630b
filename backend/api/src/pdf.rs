//! Document rendering — the acceptance-of-terms PDF handed to applicants and
//! the member-registry export, both set in the built-in Helvetica faces.
//!
//! Generation failures after an approval are the caller's problem to log;
//! nothing here touches the registries.

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use tracing::{info, warn};

use crate::errors::{ApiError, Result};
use crate::models::{format_timestamp, Member};

const PAGE_WIDTH: f64 = 210.0;
const PAGE_HEIGHT: f64 = 297.0;
const MARGIN: f64 = 20.0;

fn pdf_error<E: std::fmt::Display>(e: E) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("pdf rendering: {e}"))
}

/// Cursor that writes single lines top-down and knows nothing about pages;
/// callers decide when a new page is needed.
struct Cursor {
    layer: PdfLayerReference,
    y: f64,
}

impl Cursor {
    fn line(&mut self, font: &IndirectFontRef, size: f64, text: &str) {
        self.layer
            .use_text(text, size as _, Mm(MARGIN as _), Mm(self.y as _), font);
        self.y -= size * 0.55;
    }

    fn gap(&mut self, mm: f64) {
        self.y -= mm;
    }
}

/// Render the acceptance-of-terms document for one applicant.
pub fn acceptance_document(
    program: &str,
    name: &str,
    email: &str,
    whatsapp: &str,
    now: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("{program} — Acceptance of Terms"),
        Mm(PAGE_WIDTH as _),
        Mm(PAGE_HEIGHT as _),
        "terms",
    );
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?;

    let mut cursor = Cursor {
        layer: doc.get_page(page).get_layer(layer),
        y: PAGE_HEIGHT - MARGIN,
    };
    let stamp = now.format("%Y-%m-%d %H:%M UTC").to_string();

    cursor.line(&bold, 20.0, program);
    cursor.line(&regular, 12.0, "Acceptance of Terms");
    cursor.gap(6.0);

    cursor.line(&bold, 11.0, "Applicant");
    cursor.line(&regular, 11.0, &format!("Name: {name}"));
    cursor.line(&regular, 11.0, &format!("Email: {email}"));
    cursor.line(&regular, 11.0, &format!("WhatsApp: {whatsapp}"));
    cursor.line(&regular, 11.0, &format!("Date: {stamp}"));
    cursor.gap(6.0);

    cursor.line(&bold, 12.0, "Terms");
    let terms = [
        "1. Enrollment. The applicant enrolls by paying the required fee.",
        "2. Payment verification. The payment proof must be verified before",
        "   the enrollment is approved; this can take up to 24 hours.",
        "3. Group access. Once approved, the applicant gains access to the",
        "   private group and the benefits attached to it.",
        "4. Conduct. The applicant agrees to follow the group rules and not",
        "   to share private content outside the group.",
        "5. Consent. The applicant confirms accepting these terms freely.",
        "6. Record. This document serves as proof of acceptance.",
    ];
    for term in terms {
        cursor.line(&regular, 11.0, term);
    }
    cursor.gap(8.0);

    cursor.line(&bold, 11.0, "Voluntary acceptance");
    cursor.line(
        &regular,
        10.0,
        "I declare that I have read, understood and accepted the terms above.",
    );
    cursor.gap(4.0);
    cursor.line(&regular, 10.0, &format!("Digital signature: {name}"));
    cursor.line(&regular, 10.0, &format!("Signed at: {stamp}"));
    cursor.gap(8.0);
    cursor.line(&regular, 8.0, &format!("Generated automatically by {program}"));

    doc.save_to_bytes().map_err(pdf_error)
}

/// Render the confirmed-member registry as a PDF listing.
pub fn member_registry(
    program: &str,
    members: &[Member],
    max_places: i64,
    now: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("{program} — Confirmed members"),
        Mm(PAGE_WIDTH as _),
        Mm(PAGE_HEIGHT as _),
        "members",
    );
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?;

    let mut cursor = Cursor {
        layer: doc.get_page(page).get_layer(layer),
        y: PAGE_HEIGHT - MARGIN,
    };

    cursor.line(&bold, 16.0, &format!("{program} — Confirmed members"));
    cursor.line(
        &regular,
        10.0,
        &format!(
            "{} of {max_places} places taken — exported {}",
            members.len(),
            now.format("%Y-%m-%d %H:%M UTC"),
        ),
    );
    cursor.gap(6.0);

    if members.is_empty() {
        cursor.line(&regular, 11.0, "No confirmed members yet.");
    }

    for member in members {
        // Start a fresh page when the current one is exhausted.
        if cursor.y < MARGIN + 20.0 {
            let (page, layer) = doc.add_page(Mm(PAGE_WIDTH as _), Mm(PAGE_HEIGHT as _), "members");
            cursor = Cursor {
                layer: doc.get_page(page).get_layer(layer),
                y: PAGE_HEIGHT - MARGIN,
            };
        }
        cursor.line(
            &bold,
            11.0,
            &format!("#{} {} — {}", member.id, member.name, member.email),
        );
        cursor.line(
            &regular,
            10.0,
            &format!(
                "WhatsApp: {} — confirmed {}",
                member.whatsapp,
                format_timestamp(member.confirmed_at),
            ),
        );
        let mut project = member.project.clone();
        if project.chars().count() > 90 {
            project = project.chars().take(90).collect::<String>() + "…";
        }
        cursor.line(&regular, 10.0, &format!("Project: {project}"));
        cursor.gap(3.0);
    }

    doc.save_to_bytes().map_err(pdf_error)
}

/// Archive a generated acceptance document under `dir`. Best-effort: failures
/// are logged, never propagated.
pub async fn archive_copy(dir: &str, applicant_name: &str, bytes: &[u8]) {
    let file_name = format!(
        "acceptance_{}_{}.pdf",
        applicant_name.replace(' ', "_"),
        Utc::now().format("%Y%m%d%H%M%S"),
    );
    let path = std::path::Path::new(dir).join(&file_name);

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("could not create archive dir {dir}: {e}");
        return;
    }
    match tokio::fs::write(&path, bytes).await {
        Ok(()) => info!("acceptance document archived: {}", path.display()),
        Err(e) => warn!("could not archive acceptance document: {e}"),
    }
}
