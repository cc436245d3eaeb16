//! RFC1928 method negotiation plus RFC1929 username/password sub-negotiation.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Socks5Error;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const USER_PASS_VERSION: u8 = 0x01;

pub struct Auth {
    pub username: String,
    pub password: String,
}

/// Runs the greeting/method-selection exchange and, if configured, the
/// username/password check. Returns once the client is ready to send its
/// request.
pub async fn negotiate(stream: &mut TcpStream, auth: Option<&Auth>) -> Result<(), Socks5Error> {
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    let wants_user_pass = auth.is_some() && methods.contains(&METHOD_USER_PASS);
    let wants_no_auth = auth.is_none() && methods.contains(&METHOD_NO_AUTH);

    let selected = if wants_user_pass {
        METHOD_USER_PASS
    } else if wants_no_auth {
        METHOD_NO_AUTH
    } else {
        stream.write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE]).await?;
        return Err(Socks5Error::NoAcceptableAuthMethod);
    };

    stream.write_all(&[SOCKS_VERSION, selected]).await?;

    if selected == METHOD_USER_PASS {
        let Some(expected) = auth else { unreachable!("selected user/pass without configured auth") };
        check_user_pass(stream, expected).await?;
    }

    Ok(())
}

async fn check_user_pass(stream: &mut TcpStream, expected: &Auth) -> Result<(), Socks5Error> {
    let version = stream.read_u8().await?;
    if version != USER_PASS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let ulen = stream.read_u8().await?;
    let mut ubuf = vec![0u8; ulen as usize];
    stream.read_exact(&mut ubuf).await?;
    let username = String::from_utf8(ubuf).map_err(|_| Socks5Error::BadDomain)?;

    let plen = stream.read_u8().await?;
    let mut pbuf = vec![0u8; plen as usize];
    stream.read_exact(&mut pbuf).await?;
    let password = String::from_utf8(pbuf).map_err(|_| Socks5Error::BadDomain)?;

    let ok = username == expected.username && password == expected.password;
    stream.write_all(&[USER_PASS_VERSION, if ok { 0x00 } else { 0x01 }]).await?;

    if ok {
        Ok(())
    } else {
        Err(Socks5Error::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn no_auth_round_trip() {
        let (mut client, mut server) = pair().await;
        let server_task = tokio::spawn(async move {
            negotiate(&mut server, None).await.unwrap();
        });
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, METHOD_NO_AUTH]);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn user_pass_accepts_matching_credentials() {
        let (mut client, mut server) = pair().await;
        let auth = Auth { username: "alice".into(), password: "hunter2".into() };
        let server_task = tokio::spawn(async move {
            negotiate(&mut server, Some(&auth)).await.unwrap();
        });
        client.write_all(&[0x05, 0x01, METHOD_USER_PASS]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, METHOD_USER_PASS]);

        client.write_all(&[0x01, 5]).await.unwrap();
        client.write_all(b"alice").await.unwrap();
        client.write_all(&[7]).await.unwrap();
        client.write_all(b"hunter2").await.unwrap();

        let mut auth_reply = [0u8; 2];
        client.read_exact(&mut auth_reply).await.unwrap();
        assert_eq!(auth_reply, [0x01, 0x00]);
        server_task.await.unwrap();
    }
}
