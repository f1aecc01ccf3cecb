//! The owned byte stream a connection reads and writes frames over: plain TCP or, when configured,
//! TLS over TCP. Deadlines are applied by the caller per operation, not stored on the stream
//! itself.

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::{
    error::{Error, Result},
    options::ServerAddress,
};

const KEEPALIVE_TIME: Duration = Duration::from_secs(120);

#[cfg(feature = "rustls-tls")]
pub mod tls {
    use std::sync::Arc;

    #[derive(Clone)]
    pub struct TlsConfig {
        pub connector: tokio_rustls::TlsConnector,
    }

    impl TlsConfig {
        pub fn from_options(
            allow_invalid_certificates: bool,
            ca_file: Option<&str>,
        ) -> crate::error::Result<Self> {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            if let Some(path) = ca_file {
                let pem = std::fs::read(path).map_err(crate::error::Error::from)?;
                let mut reader = std::io::Cursor::new(pem);
                for cert in rustls_pemfile::certs(&mut reader).flatten() {
                    let _ = roots.add(cert);
                }
            }

            let mut config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();

            if allow_invalid_certificates {
                config
                    .dangerous()
                    .set_certificate_verifier(Arc::new(NoVerifier));
            }

            Ok(Self {
                connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
            })
        }
    }

    #[derive(Debug)]
    struct NoVerifier;

    impl rustls::client::danger::ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls_pki_types::CertificateDer<'_>,
            _intermediates: &[rustls_pki_types::CertificateDer<'_>],
            _server_name: &rustls_pki_types::ServerName<'_>,
            _ocsp_response: &[u8],
            _now: rustls_pki_types::UnixTime,
        ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &rustls_pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &rustls_pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

/// A connected transport: TCP, optionally wrapped in TLS.
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    pub async fn connect(
        address: &ServerAddress,
        connect_timeout: Duration,
        #[cfg(feature = "rustls-tls")] tls: Option<&tls::TlsConfig>,
    ) -> Result<Self> {
        let ServerAddress::Tcp { host, port } = address else {
            return Err(Error::invalid_argument("unix domain sockets are not supported"));
        };

        let connect_future = TcpStream::connect((host.as_str(), *port));
        let stream = timeout(connect_timeout, connect_future)
            .await
            .map_err(|_| Error::network_timeout())??;

        stream.set_nodelay(true)?;
        if let Ok(socket) = socket2::SockRef::try_from(&stream) {
            let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME);
            let _ = socket.set_tcp_keepalive(&keepalive);
        }

        #[cfg(feature = "rustls-tls")]
        if let Some(tls) = tls {
            let server_name = rustls_pki_types::ServerName::try_from(host.clone())
                .map_err(|e| Error::invalid_argument(e.to_string()))?;
            let tls_stream = tls.connector.connect(server_name, stream).await?;
            return Ok(Self::Tls(Box::new(tls_stream)));
        }

        Ok(Self::Tcp(stream))
    }

    /// Reads exactly `buf.len()` bytes, failing with a network timeout error if `deadline`
    /// elapses first. A closed connection before `buf` is filled surfaces as an I/O error.
    pub async fn read_exact(&mut self, buf: &mut [u8], deadline: Option<Duration>) -> Result<()> {
        let fut = async {
            match self {
                Transport::Tcp(s) => s.read_exact(buf).await,
                #[cfg(feature = "rustls-tls")]
                Transport::Tls(s) => s.read_exact(buf).await,
            }
        };
        match deadline {
            Some(d) => timeout(d, fut).await.map_err(|_| Error::network_timeout())??,
            None => fut.await?,
        };
        Ok(())
    }

    /// Writes the whole of `buf`; from the caller's perspective this is atomic; either every
    /// byte lands or the operation fails and the connection must be discarded.
    pub async fn write_all(&mut self, buf: &[u8], deadline: Option<Duration>) -> Result<()> {
        let fut = async {
            match self {
                Transport::Tcp(s) => {
                    s.write_all(buf).await?;
                    s.flush().await
                }
                #[cfg(feature = "rustls-tls")]
                Transport::Tls(s) => {
                    s.write_all(buf).await?;
                    s.flush().await
                }
            }
        };
        match deadline {
            Some(d) => timeout(d, fut).await.map_err(|_| Error::network_timeout())??,
            None => fut.await?,
        };
        Ok(())
    }
}
