use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Couldn't open device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: pcap::Error,
    },
    #[error("Couldn't install filter {filter}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: pcap::Error,
    },
    #[error("Capture failed: {0}")]
    Pcap(#[from] pcap::Error),
}
