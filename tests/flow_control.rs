//! Flow-controlled send (§8.3): a tiny advertised window forces the
//! writer to split a body across more than one DATA frame and resume
//! only once the peer's automatic WINDOW_UPDATE replenishes it.

use http2::{Bytes, Config, Connection, Request};

#[tokio::test]
async fn send_resumes_across_a_tiny_initial_window() {
    let _ = env_logger::try_init();
    let (client_io, server_io) = tokio::io::duplex(8192);

    let mut client_config = Config::default();
    client_config.local_settings[http2::SettingsParameter::InitialWindowSize] = 10;

    let (client, server) = tokio::join!(
        Connection::connect(client_io, client_config),
        Connection::accept(server_io, Config::default()),
    );
    let client = client.expect("client handshake");
    let server = server.expect("server handshake");

    let body: Bytes = Bytes::from_static(b"0123456789abcdefghijklmnopqrstuvwxyz");
    let expected = body.clone();

    let server_task = tokio::spawn(async move {
        http2::serve(server, move |_headers, response| {
            let body = body.clone();
            async move {
                response.write_headers(200, Vec::new(), false).await.unwrap();
                response.write(body, true).await.unwrap();
            }
        })
        .await
    });

    let request = Request::get(
        "/",
        vec![
            (":scheme".to_owned(), "http".to_owned()),
            (":authority".to_owned(), "example".to_owned()),
        ],
    );
    let mut response = client.request(request).await.expect("request failed");
    let received = response.read_body().await.expect("body read failed");
    assert_eq!(&received[..], &expected[..]);

    drop(client);
    let _ = server_task.await;
}
