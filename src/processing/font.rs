use std::fs;
use std::path::Path;

use ab_glyph::{FontArc, FontVec};
use anyhow::{Context, Result, anyhow};
use fontdb::{Database, Family, Query, Source};
use tracing::debug;

/// Loads the overlay font: an explicit file wins, then the requested family,
/// then a list of common sans faces, then anything installed.
pub fn load_font(path: Option<&Path>, family: Option<&str>) -> Result<FontArc> {
    if let Some(path) = path {
        let data =
            fs::read(path).with_context(|| format!("failed to read font at {}", path.display()))?;
        return FontArc::try_from_vec(data)
            .with_context(|| format!("failed to decode font at {}", path.display()));
    }

    let mut db = Database::new();
    db.load_system_fonts();

    let mut families = Vec::new();
    if let Some(name) = family {
        families.push(Family::Name(name));
    }
    families.extend([
        Family::Name("DejaVu Sans"),
        Family::Name("Noto Sans"),
        Family::Name("Liberation Sans"),
        Family::SansSerif,
    ]);

    for family in families {
        if let Some(id) = db.query(&Query {
            families: &[family],
            weight: fontdb::Weight::BOLD,
            ..Default::default()
        }) && let Some(font) = load_face(&db, id)?
        {
            return Ok(font);
        }
    }

    for face in db.faces() {
        if let Some(font) = load_face(&db, face.id)? {
            return Ok(font);
        }
    }

    Err(anyhow!("no usable system font found for the date overlay"))
}

fn load_face(db: &Database, id: fontdb::ID) -> Result<Option<FontArc>> {
    let face = db.face(id).context("missing font face in database")?;
    let data = match &face.source {
        Source::Binary(data) => data.as_ref().as_ref().to_vec(),
        Source::File(path) => {
            fs::read(path).with_context(|| format!("failed to read font at {}", path.display()))?
        }
        Source::SharedFile(_, data) => data.as_ref().as_ref().to_vec(),
    };
    match FontVec::try_from_vec_and_index(data, face.index) {
        Ok(font) => {
            debug!(family = ?face.families.first(), "overlay font loaded");
            Ok(Some(FontArc::new(font)))
        }
        Err(_) => Ok(None),
    }
}
