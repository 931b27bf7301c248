// MPD parsing and representation selection.

use crate::error::EngineError;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// One selected track of a DASH presentation.
///
/// Replaced wholesale on every successful manifest re-parse; nothing in
/// the engine mutates a `TrackInfo` in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackInfo {
    pub repr_id: String,
    pub timescale: u64,
    /// Nominal segment duration in timescale units.
    pub seg_duration: u64,
    /// Timeline start offset in timescale units.
    pub start_time: u64,
    pub seg_count: u64,
    pub init_template: String,
    pub media_template: String,
}

impl TrackInfo {
    /// Initialization segment URL under the tokenized edge base.
    pub fn init_url(&self, base: &str) -> String {
        let name = self
            .init_template
            .replace("$RepresentationID$", &self.repr_id);
        format!("{base}/dash/{name}")
    }

    /// Media segment URL for presentation timestamp `t`.
    pub fn media_url(&self, base: &str, t: u64) -> String {
        let name = self
            .media_template
            .replace("$RepresentationID$", &self.repr_id)
            .replace("$Time$", &t.to_string());
        format!("{base}/dash/{name}")
    }

    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.seg_duration as f64 / self.timescale as f64
        }
    }
}

/// The pair of tracks the engine acquires for one DASH channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DashManifest {
    pub video: TrackInfo,
    pub audio: TrackInfo,
}

/// Parse an MPD document and select one video and one audio track.
///
/// Walks every AdaptationSet in document order. The audio track takes the
/// first Representation; the video track takes the last Representation
/// whose declared bandwidth fits under `video_bandwidth_ceiling`, falling
/// back to the first one when none fits. Only the first `<S>` element of
/// a SegmentTimeline is read (count = r + 1); manifests whose timelines
/// mix segment durations are not supported.
pub fn parse_mpd(data: &[u8], video_bandwidth_ceiling: u64) -> Result<DashManifest, EngineError> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let text = std::str::from_utf8(data)
        .map_err(|e| EngineError::manifest(format!("MPD is not valid UTF-8: {e}")))?;
    let mpd = dash_mpd::parse(text)
        .map_err(|e| EngineError::manifest(format!("MPD parse failed: {e}")))?;

    let mut video: Option<TrackInfo> = None;
    let mut audio: Option<TrackInfo> = None;

    for period in &mpd.periods {
        for adaptation in &period.adaptations {
            let Some(template) = adaptation.SegmentTemplate.as_ref() else {
                continue;
            };
            let Some(timeline) = template.SegmentTimeline.as_ref() else {
                continue;
            };
            let Some(first) = timeline.segments.first() else {
                continue;
            };

            let timescale = template.timescale.unwrap_or(1);
            let init_template = template.initialization.clone().unwrap_or_default();
            let media_template = template.media.clone().unwrap_or_default();
            let start_time = first.t.unwrap_or(0) as u64;
            let seg_duration = first.d as u64;
            let seg_count = first.r.unwrap_or(0).max(0) as u64 + 1;

            let track = |repr_id: String| TrackInfo {
                repr_id,
                timescale,
                seg_duration,
                start_time,
                seg_count,
                init_template: init_template.clone(),
                media_template: media_template.clone(),
            };

            match adaptation.contentType.as_deref() {
                Some("audio") => {
                    let repr_id = adaptation
                        .representations
                        .first()
                        .and_then(|r| r.id.clone())
                        .unwrap_or_default();
                    audio = Some(track(repr_id));
                }
                Some("video") => {
                    let repr_id = select_video_representation(
                        &adaptation.representations,
                        video_bandwidth_ceiling,
                    );
                    video = Some(track(repr_id));
                }
                _ => {}
            }
        }
    }

    match (video, audio) {
        (Some(video), Some(audio)) if !video.repr_id.is_empty() && !audio.repr_id.is_empty() => {
            Ok(DashManifest { video, audio })
        }
        (Some(_), Some(_)) => Err(EngineError::manifest(
            "representation id missing on a selected track",
        )),
        (None, _) => Err(EngineError::manifest("no video adaptation set")),
        (_, None) => Err(EngineError::manifest("no audio adaptation set")),
    }
}

/// Last representation in document order whose bandwidth fits the
/// ceiling; first one when nothing fits. A missing bandwidth attribute
/// counts as zero and therefore always fits.
fn select_video_representation(
    representations: &[dash_mpd::Representation],
    ceiling: u64,
) -> String {
    let chosen = representations
        .iter()
        .filter(|r| r.bandwidth.unwrap_or(0) <= ceiling)
        .last()
        .or_else(|| representations.first());

    chosen.and_then(|r| r.id.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT0S">
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1000" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/t$Time$.mp4">
        <SegmentTimeline>
          <S t="0" d="6000" r="4"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v500" bandwidth="500000"/>
      <Representation id="v1000" bandwidth="1000000"/>
      <Representation id="v1500" bandwidth="1500000"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4">
      <SegmentTemplate timescale="48000" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/t$Time$.mp4">
        <SegmentTimeline>
          <S t="0" d="288000" r="4"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="a64" bandwidth="64000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_timeline_and_counts_segments() {
        let manifest = parse_mpd(MPD.as_bytes(), 1_087_600).unwrap();
        assert_eq!(manifest.video.timescale, 1000);
        assert_eq!(manifest.video.seg_duration, 6000);
        assert_eq!(manifest.video.start_time, 0);
        assert_eq!(manifest.video.seg_count, 5);
        assert_eq!(manifest.audio.repr_id, "a64");
        assert_eq!(manifest.audio.seg_count, 5);
    }

    #[test]
    fn selects_last_representation_under_ceiling() {
        let manifest = parse_mpd(MPD.as_bytes(), 1_087_600).unwrap();
        assert_eq!(manifest.video.repr_id, "v1000");
    }

    #[test]
    fn falls_back_to_first_representation_when_none_fits() {
        let manifest = parse_mpd(MPD.as_bytes(), 100_000).unwrap();
        assert_eq!(manifest.video.repr_id, "v500");
    }

    #[test]
    fn strips_utf8_bom() {
        let mut data = Vec::from(&b"\xef\xbb\xbf"[..]);
        data.extend_from_slice(MPD.as_bytes());
        assert!(parse_mpd(&data, 1_087_600).is_ok());
    }

    #[test]
    fn rejects_manifest_without_audio() {
        let stripped = MPD.replace("contentType=\"audio\"", "contentType=\"text\"");
        let err = parse_mpd(stripped.as_bytes(), 1_087_600).unwrap_err();
        assert!(matches!(err, EngineError::Manifest { .. }));
    }

    #[test]
    fn substitutes_url_templates_literally() {
        let manifest = parse_mpd(MPD.as_bytes(), 1_087_600).unwrap();
        assert_eq!(
            manifest.video.init_url("https://edge/token"),
            "https://edge/token/dash/v1000/init.mp4"
        );
        assert_eq!(
            manifest.video.media_url("https://edge/token", 12000),
            "https://edge/token/dash/v1000/t12000.mp4"
        );
    }
}
