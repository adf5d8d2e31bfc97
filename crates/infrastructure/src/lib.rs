pub mod prober;
pub mod resource_probe;
pub mod subtitle_extractor;
pub mod torrent_engine;
pub mod transcoder_process;
pub mod url_downloader;

pub use prober::FfprobeMediaProber;
pub use resource_probe::CgroupResourceProbe;
pub use torrent_engine::LibrqbitTorrentEngine;
pub use transcoder_process::FfmpegTranscoderProcess;
pub use url_downloader::YtDlpDownloader;
