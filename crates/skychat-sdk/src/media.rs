//! 图片与语音附件的本地预处理
//!
//! 图片消息在元数据中携带原图尺寸和 base64 编码的 JPEG 缩略图，
//! 会话列表不必下载原图即可预览。

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::error::{ChatSDKError, Result};
use crate::models::message::METADATA_TYPE_KEY;
use crate::models::ChatMetadataType;

/// 缩略图最长边
pub const THUMBNAIL_MAX_EDGE: u32 = 80;
/// 缩略图 JPEG 质量
pub const THUMBNAIL_QUALITY: u8 = 60;

/// 待发送的图片
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub data: Bytes,
    pub mime_type: String,
}

impl ImageAttachment {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// 从文件读取，MIME 类型按扩展名判断
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        Ok(Self::new(data, detect_mime_type(path)))
    }
}

/// 最长边不超过 max_edge，另一边等比缩放，至少为 1
pub fn scale_to_max_edge(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max_edge == 0 {
        return (width.max(1), height.max(1));
    }
    if width >= height {
        let new_w = width.min(max_edge);
        let new_h = ((height as u64) * (new_w as u64) / (width as u64)) as u32;
        (new_w, new_h.max(1))
    } else {
        let new_h = height.min(max_edge);
        let new_w = ((width as u64) * (new_h as u64) / (height as u64)) as u32;
        (new_w.max(1), new_h)
    }
}

/// 解码图片，生成图片消息的元数据（阻塞操作，调用方负责放到 blocking 线程）
pub fn image_metadata_sync(data: &[u8]) -> Result<Map<String, Value>> {
    use image::codecs::jpeg::JpegEncoder;

    let img = image::load_from_memory(data)
        .map_err(|e| ChatSDKError::InvalidArgument(format!("解码图片失败: {}", e)))?;
    let (width, height) = (img.width(), img.height());

    let (target_w, target_h) = scale_to_max_edge(width, height, THUMBNAIL_MAX_EDGE);
    let thumb = img
        .resize_exact(target_w, target_h, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, THUMBNAIL_QUALITY)
        .encode(thumb.as_raw(), thumb.width(), thumb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| ChatSDKError::InvalidArgument(format!("生成缩略图失败: {}", e)))?;

    let mut metadata = Map::new();
    metadata.insert(METADATA_TYPE_KEY.to_string(), json!(ChatMetadataType::Image.as_str()));
    metadata.insert("width".to_string(), json!(width));
    metadata.insert("height".to_string(), json!(height));
    metadata.insert("thumbnail".to_string(), json!(BASE64.encode(&jpeg)));
    Ok(metadata)
}

pub async fn image_metadata(data: Bytes) -> Result<Map<String, Value>> {
    tokio::task::spawn_blocking(move || image_metadata_sync(&data))
        .await
        .map_err(|e| ChatSDKError::InvalidData(format!("图片处理任务失败: {}", e)))?
}

/// 语音消息元数据，`length` 为毫秒
pub fn voice_metadata(duration_secs: f64) -> Result<Map<String, Value>> {
    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Err(ChatSDKError::InvalidArgument(format!(
            "语音时长必须是非负数: {}",
            duration_secs
        )));
    }
    let mut metadata = Map::new();
    metadata.insert(METADATA_TYPE_KEY.to_string(), json!(ChatMetadataType::Voice.as_str()));
    metadata.insert("length".to_string(), json!((duration_secs * 1000.0).round() as u64));
    Ok(metadata)
}

/// 根据扩展名推断 MIME 类型
pub fn detect_mime_type(path: &Path) -> String {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "m4a" => "audio/mp4",
            "aac" => "audio/aac",
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "ogg" | "oga" => "audio/ogg",
            "amr" => "audio/amr",
            "caf" => "audio/x-caf",
            _ => "application/octet-stream",
        }
    } else {
        "application/octet-stream"
    }
    .to_string()
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_keeps_aspect_ratio() {
        assert_eq!(scale_to_max_edge(1600, 800, 80), (80, 40));
        assert_eq!(scale_to_max_edge(300, 1200, 80), (20, 80));
        assert_eq!(scale_to_max_edge(40, 20, 80), (40, 20));
        assert_eq!(scale_to_max_edge(1000, 1, 80), (80, 1));
    }

    #[tokio::test]
    async fn test_image_metadata_has_dimensions_and_thumbnail() {
        let metadata = image_metadata(Bytes::from(sample_png(160, 90))).await.unwrap();
        assert_eq!(metadata["type"], "image");
        assert_eq!(metadata["width"], 160);
        assert_eq!(metadata["height"], 90);

        let thumbnail = BASE64.decode(metadata["thumbnail"].as_str().unwrap()).unwrap();
        let decoded = image::load_from_memory(&thumbnail).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (80, 45));
    }

    #[tokio::test]
    async fn test_invalid_image_is_rejected() {
        let err = image_metadata(Bytes::from_static(b"not an image")).await.unwrap_err();
        assert!(matches!(err, ChatSDKError::InvalidArgument(_)));
    }

    #[test]
    fn test_voice_metadata() {
        assert_eq!(voice_metadata(1.5).unwrap()["length"], 1500);
        assert_eq!(voice_metadata(0.0).unwrap()["length"], 0);
        assert!(voice_metadata(-0.1).is_err());
        assert!(voice_metadata(f64::NAN).is_err());
        assert!(voice_metadata(f64::INFINITY).is_err());
    }

    #[test]
    fn test_detect_mime_type() {
        assert_eq!(detect_mime_type(Path::new("a/voice.M4A")), "audio/mp4");
        assert_eq!(detect_mime_type(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(detect_mime_type(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_image_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.png");
        tokio::fs::write(&path, sample_png(4, 4)).await.unwrap();

        let image = ImageAttachment::from_path(&path).await.unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert!(!image.data.is_empty());
    }
}
