use std::io;

use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::ser::Formatter;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/116.0",
];

const SCREEN_RESOLUTIONS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1280, 720), (1536, 864), (1440, 900)];

const WEBGL_RENDERERS: &[&str] = &[
    "WebKit WebGL",
    "Mozilla WebGL",
    "ANGLE (NVIDIA GTX 1660 Ti Direct3D11 vs_5_0 ps_5_0)",
    "Google Inc. (NVIDIA)",
    "Intel Iris OpenGL Engine",
];

/// UTC+8
const TIMEZONE_OFFSET: i32 = 8;

/// Writes `", "` between items and `": "` after keys, the default separators of Python's `json.dumps`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Synthetic browser attributes. Fields are declared in key order so the JSON is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserProfile {
    pub screen_resolution: (u32, u32),
    pub timezone_offset: i32,
    pub user_agent: &'static str,
    pub webgl_renderer: &'static str,
}

#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// 16 hex characters, sent as `fpVisitorId`.
    pub visitor_id: String,
    pub profile: BrowserProfile,
}

impl BrowserProfile {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        BrowserProfile {
            screen_resolution: *SCREEN_RESOLUTIONS.choose(&mut rng).unwrap_or(&SCREEN_RESOLUTIONS[0]),
            timezone_offset: TIMEZONE_OFFSET,
            user_agent: USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0]),
            webgl_renderer: WEBGL_RENDERERS.choose(&mut rng).unwrap_or(&WEBGL_RENDERERS[0]),
        }
    }

    /// Sorted-key JSON with spaced separators, the form the visitor id is hashed from.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        let mut serializer = serde_json::Serializer::with_formatter(Vec::new(), SpacedFormatter);
        self.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&serializer.into_inner()).into_owned())
    }

    /// First 16 hex characters of the MD5 of [`canonical_json`](Self::canonical_json).
    pub fn visitor_id(&self) -> String {
        let json = self.canonical_json().unwrap_or_default();
        let digest = format!("{:x}", md5::compute(json.as_bytes()));
        digest[..16].to_string()
    }
}

/// A fresh fingerprint; two calls may differ.
pub fn generate_fingerprint() -> Fingerprint {
    let profile = BrowserProfile::random();
    Fingerprint { visitor_id: profile.visitor_id(), profile }
}
