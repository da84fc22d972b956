use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ControllerError;
use crate::models::{MediaPayload, Settings, StyleReference, Upload};
use crate::presets::Preset;

/// Locally owned preview resources for uploaded files, served back to the
/// front-end while they are alive.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    live: HashMap<Uuid, MediaPayload>,
}

impl PreviewRegistry {
    pub fn create(&mut self, media: &MediaPayload) -> Uuid {
        let id = Uuid::new_v4();
        self.live.insert(id, media.clone());
        id
    }

    pub fn release(&mut self, id: Uuid) -> bool {
        let released = self.live.remove(&id).is_some();
        if released {
            debug!("🧹 Released preview {}", id);
        }
        released
    }

    pub fn get(&self, id: Uuid) -> Option<&MediaPayload> {
        self.live.get(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Who owns the preview shown for a style reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSource {
    /// Created for an upload; released with the slot.
    Local(Uuid),
    /// Derived from a saved preset; nothing to release.
    Preset,
}

#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: Option<String>,
    pub media: MediaPayload,
    pub preview: Uuid,
}

#[derive(Debug, Clone)]
pub struct StyleFile {
    pub name: Option<String>,
    pub reference: StyleReference,
    pub preview: PreviewSource,
}

/// Live editing inputs of the render and animate workflows.
#[derive(Debug, Default)]
pub struct Workspace {
    previews: PreviewRegistry,
    plan: Option<SourceImage>,
    styles: Vec<StyleFile>,
    settings: Settings,
    animate_image: Option<SourceImage>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub name: Option<String>,
    pub mime_type: String,
    pub preview_url: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StyleView {
    pub name: Option<String>,
    pub mime_type: String,
    pub weight: f32,
    pub preview_url: String,
    pub from_preset: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceView {
    pub plan: Option<FileView>,
    pub styles: Vec<StyleView>,
    pub settings: Settings,
    pub animate_image: Option<FileView>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_plan(&mut self, upload: Upload) -> Result<Uuid, ControllerError> {
        let image = self.intake(upload)?;
        let preview = image.preview;
        if let Some(old) = self.plan.replace(image) {
            self.previews.release(old.preview);
        }
        info!("📐 Plan updated");
        Ok(preview)
    }

    pub fn clear_plan(&mut self) {
        if let Some(old) = self.plan.take() {
            self.previews.release(old.preview);
        }
    }

    pub fn plan(&self) -> Option<&MediaPayload> {
        self.plan.as_ref().map(|p| &p.media)
    }

    pub fn set_animate_image(&mut self, upload: Upload) -> Result<Uuid, ControllerError> {
        let image = self.intake(upload)?;
        let preview = image.preview;
        if let Some(old) = self.animate_image.replace(image) {
            self.previews.release(old.preview);
        }
        Ok(preview)
    }

    pub fn clear_animate_image(&mut self) {
        if let Some(old) = self.animate_image.take() {
            self.previews.release(old.preview);
        }
    }

    pub fn animate_image(&self) -> Option<&MediaPayload> {
        self.animate_image.as_ref().map(|a| &a.media)
    }

    /// Appends uploads as full-influence style references. All-or-nothing.
    pub fn add_styles(&mut self, uploads: Vec<Upload>) -> Result<usize, ControllerError> {
        let decoded = uploads
            .into_iter()
            .map(decode_upload)
            .collect::<Result<Vec<_>, _>>()?;
        for (name, media) in decoded {
            let preview = PreviewSource::Local(self.previews.create(&media));
            self.styles.push(StyleFile {
                name,
                reference: StyleReference::new(media).with_weight(1.0),
                preview,
            });
        }
        Ok(self.styles.len())
    }

    pub fn set_style_weight(&mut self, index: usize, weight: f32) -> Result<(), ControllerError> {
        let style = self.styles.get_mut(index).ok_or(ControllerError::NotFound("style reference"))?;
        style.reference = style.reference.clone().with_weight(weight);
        Ok(())
    }

    pub fn remove_style(&mut self, index: usize) -> Result<(), ControllerError> {
        if index >= self.styles.len() {
            return Err(ControllerError::NotFound("style reference"));
        }
        let removed = self.styles.remove(index);
        if let PreviewSource::Local(id) = removed.preview {
            self.previews.release(id);
        }
        Ok(())
    }

    /// Moves a reference; its weight moves with it.
    pub fn reorder_style(&mut self, from: usize, to: usize) -> Result<(), ControllerError> {
        let len = self.styles.len();
        if from >= len || to >= len {
            return Err(ControllerError::NotFound("style reference"));
        }
        let style = self.styles.remove(from);
        self.styles.insert(to, style);
        Ok(())
    }

    pub fn load_preset(&mut self, preset: &Preset) {
        self.settings = preset.settings.normalized();
        for old in self.styles.drain(..) {
            if let PreviewSource::Local(id) = old.preview {
                self.previews.release(id);
            }
        }
        self.styles = preset
            .styles
            .iter()
            .map(|s| StyleFile { name: None, reference: s.to_reference(), preview: PreviewSource::Preset })
            .collect();
        info!("🎛️ Loaded preset '{}' ({} styles)", preset.name, self.styles.len());
    }

    /// Snapshot of the style list for a render or a batch job.
    pub fn style_references(&self) -> Vec<StyleReference> {
        self.styles.iter().map(|s| s.reference.clone()).collect()
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings.normalized();
    }

    pub fn preview(&self, id: Uuid) -> Option<&MediaPayload> {
        self.previews.get(id)
    }

    pub fn live_previews(&self) -> usize {
        self.previews.len()
    }

    /// Releases every owned preview and forgets all inputs. Settings survive.
    pub fn reset(&mut self) {
        self.clear_plan();
        self.clear_animate_image();
        for old in self.styles.drain(..) {
            if let PreviewSource::Local(id) = old.preview {
                self.previews.release(id);
            }
        }
    }

    pub fn view(&self) -> WorkspaceView {
        let file_view = |f: &SourceImage| FileView {
            name: f.name.clone(),
            mime_type: f.media.mime_type.clone(),
            preview_url: preview_url(f.preview),
        };
        WorkspaceView {
            plan: self.plan.as_ref().map(file_view),
            styles: self
                .styles
                .iter()
                .map(|s| StyleView {
                    name: s.name.clone(),
                    mime_type: s.reference.image.mime_type.clone(),
                    weight: s.reference.weight(),
                    preview_url: match s.preview {
                        PreviewSource::Local(id) => preview_url(id),
                        PreviewSource::Preset => s.reference.image.data_url(),
                    },
                    from_preset: s.preview == PreviewSource::Preset,
                })
                .collect(),
            settings: self.settings,
            animate_image: self.animate_image.as_ref().map(file_view),
        }
    }

    fn intake(&mut self, upload: Upload) -> Result<SourceImage, ControllerError> {
        let (name, media) = decode_upload(upload)?;
        let preview = self.previews.create(&media);
        Ok(SourceImage { name, media, preview })
    }
}

fn preview_url(id: Uuid) -> String {
    format!("/api/previews/{}", id)
}

/// Validates an upload and settles its MIME type, sniffing the bytes when
/// the client did not declare one.
pub fn decode_upload(upload: Upload) -> Result<(Option<String>, MediaPayload), ControllerError> {
    if upload.data.is_empty() {
        return Err(ControllerError::InvalidInput("uploaded file is empty".into()));
    }
    let mime_type = match upload.mime_type.filter(|m| !m.trim().is_empty()) {
        Some(m) => m,
        None => image::guess_format(&upload.data)
            .map(|f| f.to_mime_type().to_string())
            .map_err(|_| ControllerError::InvalidInput("could not determine the image type of the upload".into()))?,
    };
    if !mime_type.starts_with("image/") {
        return Err(ControllerError::InvalidInput(format!("expected an image, got {}", mime_type)));
    }
    Ok((upload.name, MediaPayload::new(mime_type, upload.data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::PresetStyle;
    use pretty_assertions::assert_eq;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn upload(tag: u8) -> Upload {
        Upload { name: Some(format!("f{tag}.png")), mime_type: Some("image/png".into()), data: vec![tag; 4] }
    }

    fn weights(ws: &Workspace) -> Vec<f32> {
        ws.style_references().iter().map(StyleReference::weight).collect()
    }

    #[test]
    fn replacing_plan_releases_old_preview() {
        let mut ws = Workspace::new();
        let first = ws.set_plan(upload(1)).unwrap();
        let second = ws.set_plan(upload(2)).unwrap();
        assert!(ws.preview(first).is_none());
        assert!(ws.preview(second).is_some());
        assert_eq!(ws.live_previews(), 1);

        ws.clear_plan();
        assert_eq!(ws.live_previews(), 0);
        assert!(ws.plan().is_none());
    }

    #[test]
    fn removing_style_releases_its_preview() {
        let mut ws = Workspace::new();
        ws.add_styles(vec![upload(1), upload(2)]).unwrap();
        assert_eq!(ws.live_previews(), 2);
        ws.remove_style(0).unwrap();
        assert_eq!(ws.live_previews(), 1);
        assert_eq!(ws.style_references()[0].image.data[0], 2);
    }

    #[test]
    fn preset_styles_never_release_anything() {
        let mut ws = Workspace::new();
        ws.set_plan(upload(9)).unwrap();
        ws.add_styles(vec![upload(1)]).unwrap();
        let preset = Preset {
            name: "Warm".into(),
            settings: Settings::default(),
            styles: vec![PresetStyle::from_reference(&StyleReference::new(MediaPayload::new("image/png", vec![5])))],
        };
        ws.load_preset(&preset);
        // The uploaded style's preview went away, the plan's stayed.
        assert_eq!(ws.live_previews(), 1);

        ws.remove_style(0).unwrap();
        assert_eq!(ws.live_previews(), 1);
        assert!(ws.style_references().is_empty());
    }

    #[test]
    fn reorder_carries_weights() {
        let mut ws = Workspace::new();
        ws.add_styles(vec![upload(1), upload(2), upload(3)]).unwrap();
        ws.set_style_weight(0, 0.2).unwrap();
        ws.set_style_weight(2, 0.7).unwrap();
        ws.reorder_style(0, 2).unwrap();

        let tags: Vec<u8> = ws.style_references().iter().map(|s| s.image.data[0]).collect();
        assert_eq!(tags, vec![2, 3, 1]);
        assert_eq!(weights(&ws), vec![1.0, 0.7, 0.2]);
    }

    #[test]
    fn sniffs_missing_mime_type() {
        let mut data = PNG_MAGIC.to_vec();
        data.extend_from_slice(&[0; 16]);
        let (_, media) = decode_upload(Upload { name: None, mime_type: None, data }).unwrap();
        assert_eq!(media.mime_type, "image/png");
    }

    #[test]
    fn rejects_non_images() {
        let err = decode_upload(Upload { name: None, mime_type: Some("text/plain".into()), data: vec![1] });
        assert!(matches!(err, Err(ControllerError::InvalidInput(_))));
        let err = decode_upload(Upload { name: None, mime_type: None, data: vec![] });
        assert!(matches!(err, Err(ControllerError::InvalidInput(_))));
    }

    #[test]
    fn bad_index_is_not_found() {
        let mut ws = Workspace::new();
        assert!(matches!(ws.remove_style(0), Err(ControllerError::NotFound(_))));
        assert!(matches!(ws.reorder_style(0, 1), Err(ControllerError::NotFound(_))));
        assert!(matches!(ws.set_style_weight(3, 0.5), Err(ControllerError::NotFound(_))));
    }

    #[test]
    fn reset_releases_everything() {
        let mut ws = Workspace::new();
        ws.set_plan(upload(1)).unwrap();
        ws.set_animate_image(upload(2)).unwrap();
        ws.add_styles(vec![upload(3), upload(4)]).unwrap();
        ws.reset();
        assert_eq!(ws.live_previews(), 0);
        assert!(ws.view().styles.is_empty());
    }
}
