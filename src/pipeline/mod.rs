//! Pipeline de streaming: de un locator a PCM crudo para la mezcladora.
//!
//! Estrategia A: resolver una URL directa de audio con `yt-dlp --get-url`
//! (recorriendo una escalera de formatos) y dársela a un `ffmpeg` con
//! reconexión de red, que decodifica a PCM f32-le 48kHz estéreo por stdout.
//!
//! Estrategia B: si ninguna entrada de la escalera dio URL, encadenar
//! `yt-dlp -o -` directamente al stdin de `ffmpeg`.
//!
//! Todos los procesos de un arranque cuelgan de una [`ProcessGeneration`]
//! que se mata como unidad; el sink consume stdout de forma incremental.

use std::io::{self, Read, Seek, SeekFrom};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use songbird::input::{AudioStream, Input, LiveInput, RawAdapter};
use symphonia::core::io::MediaSource;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resolver::AudioLocator;

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;

/// Escalera de selectores de formato, del mejor al más compatible.
const FORMAT_LADDER: &[&str] = &[
    "bestaudio[ext=m4a]",
    "bestaudio[ext=webm]",
    "bestaudio",
    "bestaudio/best",
];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no se pudo establecer ningún stream para `{0}`")]
    Unavailable(String),
}

/// Parámetros del pipeline, extraídos de la configuración global.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub extract_timeout: Duration,
    pub reconnect_delay_max_secs: u32,
}

impl From<&crate::config::Config> for PipelineSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            extract_timeout: Duration::from_secs(config.extract_timeout_secs),
            reconnect_delay_max_secs: config.reconnect_delay_max_secs,
        }
    }
}

/// Una generación de subprocesos: todos los procesos que alimentan un track.
///
/// `terminate` los mata a todos, no solo al que produce el stdout que se
/// consume; matar la generación es la única forma de pararla a mitad de
/// stream.
pub struct ProcessGeneration {
    label: String,
    children: Mutex<Vec<Child>>,
}

impl ProcessGeneration {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn adopt(&self, child: Child) {
        self.children.lock().push(child);
    }

    /// Procesos aún bajo custodia de la generación.
    #[allow(dead_code)]
    pub fn live_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Mata (SIGKILL) y cosecha todos los procesos de la generación.
    ///
    /// Idempotente: llamadas posteriores no hacen nada.
    pub fn terminate(&self) {
        let mut children = self.children.lock();
        if children.is_empty() {
            return;
        }

        info!(
            "🔪 Terminando generación `{}` ({} procesos)",
            self.label,
            children.len()
        );

        for mut child in children.drain(..) {
            if let Err(e) = child.kill() {
                // ESRCH: ya había salido solo
                debug!("kill falló para un proceso de `{}`: {}", self.label, e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for ProcessGeneration {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Stream listo para el sink más la generación que lo alimenta.
pub struct OpenedStream {
    pub input: Input,
    pub generation: Arc<ProcessGeneration>,
}

/// stdout de ffmpeg envuelto como fuente de medios no-seekable.
struct PcmStream {
    stdout: std::process::ChildStdout,
}

impl Read for PcmStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Seek for PcmStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "un stream de proceso no permite seek",
        ))
    }
}

impl MediaSource for PcmStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Abre un stream de PCM crudo para el locator.
pub async fn open_stream(
    locator: &AudioLocator,
    settings: PipelineSettings,
) -> Result<OpenedStream, PipelineError> {
    let generation = Arc::new(ProcessGeneration::new(locator.url.clone()));

    // Estrategia A: URL directa + ffmpeg con reconexión
    if let Some(media_url) = extract_direct_url(&locator.url, settings.extract_timeout).await {
        match spawn_transcoder(&media_url, settings.reconnect_delay_max_secs, &generation) {
            Ok(stream) => {
                info!("🎵 Stream directo establecido para {}", locator.url);
                return Ok(OpenedStream {
                    input: pcm_input(stream),
                    generation,
                });
            }
            Err(e) => warn!("❌ ffmpeg no arrancó con URL directa: {}", e),
        }
    } else {
        warn!(
            "⚠️ Escalera de formatos agotada para {}, usando descarga encadenada",
            locator.url
        );
    }

    // Estrategia B: yt-dlp -o - | ffmpeg
    match spawn_piped_pair(&locator.url, &generation) {
        Ok(stream) => {
            info!("🎵 Stream encadenado establecido para {}", locator.url);
            Ok(OpenedStream {
                input: pcm_input(stream),
                generation,
            })
        }
        Err(e) => {
            warn!("❌ Pipeline encadenado falló: {}", e);
            generation.terminate();
            Err(PipelineError::Unavailable(locator.url.clone()))
        }
    }
}

/// Recorre la escalera de formatos pidiendo una URL directa de audio.
async fn extract_direct_url(url: &str, timeout: Duration) -> Option<String> {
    for selector in FORMAT_LADDER {
        debug!("📡 Probando selector `{}` para {}", selector, url);

        let attempt = async_process::Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "-f",
                selector,
                "--get-url",
                "--quiet",
                "--no-warnings",
                "--socket-timeout",
                "10",
                url,
            ])
            .output();

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if let Some(media_url) = stdout
                    .lines()
                    .map(str::trim)
                    .find(|l| l.starts_with("http"))
                {
                    return Some(media_url.to_string());
                }
                debug!("selector `{}` no produjo URL", selector);
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!("selector `{}` rechazado: {}", selector, stderr.trim());
            }
            Ok(Err(e)) => {
                warn!("❌ No se pudo ejecutar yt-dlp: {}", e);
                return None;
            }
            Err(_) => {
                warn!("⏰ Timeout extrayendo URL con `{}`", selector);
            }
        }
    }

    None
}

/// ffmpeg leyendo una URL remota con reconexión, PCM crudo por stdout.
fn spawn_transcoder(
    media_url: &str,
    reconnect_delay_max_secs: u32,
    generation: &ProcessGeneration,
) -> io::Result<PcmStream> {
    let mut child = Command::new("ffmpeg")
        .args(ffmpeg_url_args(media_url, reconnect_delay_max_secs))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("ffmpeg sin stdout"))?;

    generation.adopt(child);
    Ok(PcmStream { stdout })
}

/// `yt-dlp -o -` encadenado al stdin de ffmpeg; ambos quedan en la generación.
fn spawn_piped_pair(url: &str, generation: &ProcessGeneration) -> io::Result<PcmStream> {
    let mut extractor = Command::new("yt-dlp")
        .args(ytdlp_pipe_args(url))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let extractor_stdout = extractor
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("yt-dlp sin stdout"))?;

    generation.adopt(extractor);

    let mut transcoder = Command::new("ffmpeg")
        .args(ffmpeg_stdin_args())
        .stdin(Stdio::from(extractor_stdout))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let stdout = transcoder
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("ffmpeg sin stdout"))?;

    generation.adopt(transcoder);
    Ok(PcmStream { stdout })
}

/// Envuelve el PCM crudo para la mezcladora de songbird.
fn pcm_input(stream: PcmStream) -> Input {
    let adapter = RawAdapter::new(stream, SAMPLE_RATE, CHANNELS);
    let audio_stream = AudioStream {
        input: Box::new(adapter) as Box<dyn MediaSource>,
        hint: None,
    };
    Input::Live(LiveInput::Raw(audio_stream), None)
}

fn ffmpeg_url_args(media_url: &str, reconnect_delay_max_secs: u32) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-reconnect".to_string(),
        "1".to_string(),
        "-reconnect_streamed".to_string(),
        "1".to_string(),
        "-reconnect_delay_max".to_string(),
        reconnect_delay_max_secs.to_string(),
        "-i".to_string(),
        media_url.to_string(),
        "-vn".to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        CHANNELS.to_string(),
        "pipe:1".to_string(),
    ]
}

fn ffmpeg_stdin_args() -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-vn".to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        CHANNELS.to_string(),
        "pipe:1".to_string(),
    ]
}

fn ytdlp_pipe_args(url: &str) -> Vec<String> {
    vec![
        "-f".to_string(),
        "bestaudio/best".to_string(),
        "--no-playlist".to_string(),
        "--quiet".to_string(),
        "--no-warnings".to_string(),
        "-o".to_string(),
        "-".to_string(),
        url.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_ladder_goes_best_to_safest() {
        assert_eq!(FORMAT_LADDER.first(), Some(&"bestaudio[ext=m4a]"));
        assert_eq!(FORMAT_LADDER.last(), Some(&"bestaudio/best"));
    }

    #[test]
    fn test_ffmpeg_url_args_request_reconnect_and_pcm() {
        let args = ffmpeg_url_args("https://cdn.example/audio.m4a", 5);
        assert!(args.windows(2).any(|w| w == ["-reconnect", "1"]));
        assert!(args.windows(2).any(|w| w == ["-reconnect_delay_max", "5"]));
        assert!(args.windows(2).any(|w| w == ["-f", "f32le"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "2"]));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_ffmpeg_stdin_args_read_from_pipe() {
        let args = ffmpeg_stdin_args();
        assert!(args.windows(2).any(|w| w == ["-i", "pipe:0"]));
        assert!(args.windows(2).any(|w| w == ["-f", "f32le"]));
    }

    #[test]
    fn test_ytdlp_pipe_args_stream_to_stdout() {
        let args = ytdlp_pipe_args("https://www.youtube.com/watch?v=abc");
        assert!(args.windows(2).any(|w| w == ["-o", "-"]));
        assert!(args.windows(2).any(|w| w == ["-f", "bestaudio/best"]));
    }

    #[test]
    fn test_generation_terminate_kills_everything() {
        let generation = ProcessGeneration::new("test");
        for _ in 0..2 {
            let child = Command::new("sleep")
                .arg("30")
                .stdout(Stdio::null())
                .spawn()
                .expect("sleep debería arrancar");
            generation.adopt(child);
        }
        assert_eq!(generation.live_count(), 2);

        generation.terminate();
        assert_eq!(generation.live_count(), 0);

        // Idempotente
        generation.terminate();
        assert_eq!(generation.live_count(), 0);
    }

    #[test]
    fn test_generation_drop_reaps_children() {
        let generation = ProcessGeneration::new("drop-test");
        let child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .expect("sleep debería arrancar");
        generation.adopt(child);
        // Si drop no matara al hijo, este test dejaría un sleep huérfano 30s;
        // el wait interno garantiza que no queden zombis.
        drop(generation);
    }
}
