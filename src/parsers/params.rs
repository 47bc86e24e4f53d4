//! Parameter XML sent in reply to `sendparameters`.

use std::path::PathBuf;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{RelayError, Result};

/// Values the emulator reports about its source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    pub mocap_file: Option<PathBuf>,
    pub audio_file: Option<PathBuf>,
    pub video_file: Option<PathBuf>,
    pub frames_sent: usize,
    /// Sampling frequency in Hz, written for both the 3D and the 6D section.
    pub frequency: Option<f64>,
}

impl ParameterSet {
    /// Render as an XML document rooted at `<Parameters>`.
    pub fn to_xml(&self) -> Result<String> {
        let path_text = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
        let frequency = self.frequency.map(|f| f.to_string()).unwrap_or_default();

        let mut xml = XmlOut::new();
        xml.decl()?;
        xml.open("Parameters")?;
        xml.open("General")?;
        xml.open("Multimodal")?;
        xml.leaf("MocapFileAbsLoc", &path_text(&self.mocap_file))?;
        xml.leaf("AudioFileAbsLoc", &path_text(&self.audio_file))?;
        xml.leaf("VideoFileAbsLoc", &path_text(&self.video_file))?;
        xml.close("Multimodal")?;
        xml.open("Server")?;
        xml.open("Stats")?;
        xml.leaf("FramesSent", &self.frames_sent.to_string())?;
        xml.close("Stats")?;
        xml.close("Server")?;
        xml.close("General")?;
        for section in ["The_3D", "The_6D"] {
            xml.open(section)?;
            xml.leaf("Frequency", &frequency)?;
            xml.close(section)?;
        }
        xml.close("Parameters")?;
        xml.finish()
    }
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self { writer: Writer::new_with_indent(Vec::new(), b' ', 2) }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| RelayError::parse_error("parameter xml", e.to_string()))
    }

    fn decl(&mut self) -> Result<()> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    fn open(&mut self, name: &str) -> Result<()> {
        self.write(Event::Start(BytesStart::new(name)))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn leaf(&mut self, name: &str, text: &str) -> Result<()> {
        if text.is_empty() {
            return self.write(Event::Empty(BytesStart::new(name)));
        }
        self.open(name)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| RelayError::parse_error("parameter xml", e.to_string()))
    }
}

/// First `<Frequency>` value anywhere in a parameter document.
pub fn frequency_from_xml(xml: &str) -> Option<f64> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"Frequency" => inside = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"Frequency" => inside = false,
            Ok(Event::Text(text)) if inside => {
                let value: f64 = text.unescape().ok()?.trim().parse().ok()?;
                return (value.is_finite() && value > 0.0).then_some(value);
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_round_trips_through_xml() -> anyhow::Result<()> {
        let params = ParameterSet {
            mocap_file: Some("/data/take1.tsv".into()),
            frames_sent: 12,
            frequency: Some(100.0),
            ..Default::default()
        };
        let xml = params.to_xml()?;
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<MocapFileAbsLoc>/data/take1.tsv</MocapFileAbsLoc>"), "{xml}");
        assert!(xml.contains("<FramesSent>12</FramesSent>"), "{xml}");
        assert!(xml.contains("<AudioFileAbsLoc/>"), "{xml}");
        assert_eq!(frequency_from_xml(&xml), Some(100.0));
        Ok(())
    }

    #[test]
    fn missing_frequency_reads_none() -> anyhow::Result<()> {
        let xml = ParameterSet::default().to_xml()?;
        assert_eq!(frequency_from_xml(&xml), None);
        assert_eq!(frequency_from_xml("not xml <<<"), None);
        Ok(())
    }

    #[test]
    fn reads_device_style_document() {
        let xml = "<Parameters><The_6D><Frequency> 400 </Frequency></The_6D></Parameters>";
        assert_eq!(frequency_from_xml(xml), Some(400.0));
    }

    #[test]
    fn paths_are_escaped() -> anyhow::Result<()> {
        let params = ParameterSet { mocap_file: Some("/a&b/c<d>.tsv".into()), ..Default::default() };
        let xml = params.to_xml()?;
        assert!(xml.contains("/a&amp;b/c&lt;d&gt;.tsv"), "{xml}");
        Ok(())
    }
}
