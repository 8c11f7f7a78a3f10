//! スクリプト化した疑似デーモンに対するオーケストレーションのテスト
//!
//! 実際の Docker デーモンの代わりに、あらかじめ決めたレスポンスを
//! 返すローカルリスナーを立ててパイプライン全体を検証します。

use gitship_build::{BuildError, DockerBuilder};
use gitship_core::{BuilderConfig, PushConfig, SshConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Mutex;

/// 受信したリクエストヘッダの記録
type RequestLog = Arc<Mutex<Vec<String>>>;

/// 接続ごとに決まったレスポンスを返す疑似デーモンを起動
///
/// HTTP/1.0 なので 1 接続 = 1 リクエスト。レスポンスを書いたら
/// 接続を閉じる。
async fn spawn_daemon(responses: Vec<String>) -> (std::net::SocketAddr, RequestLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();

    tokio::spawn(async move {
        for response in responses {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let mut reader = BufReader::new(stream);
            let head = read_request(&mut reader).await;
            log.lock().await.push(head);

            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
    });

    (addr, requests)
}

/// リクエストヘッダを読み、Content-Length 分のボディを読み捨てる
async fn read_request<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> String {
    let mut head = String::new();
    let mut content_length = 0usize;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        if line == "\r\n" {
            break;
        }
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap();
        }
        head.push_str(&line);
    }

    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await.unwrap();
    }

    head
}

/// Dockerfile 入りのテスト用プロジェクトを作成
fn test_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Dockerfile"), "FROM alpine\nCMD true\n").unwrap();
    fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();
    dir
}

fn ok_response(lines: &[&str]) -> String {
    format!(
        "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{}",
        lines
            .iter()
            .map(|l| format!("{}\n", l))
            .collect::<String>()
    )
}

#[tokio::test]
async fn test_build_success_collects_stream_lines() {
    let (addr, requests) = spawn_daemon(vec![ok_response(&[
        r#"{"stream":"Step 1/2 : FROM alpine\n"}"#,
        r#"{"stream":"Successfully built 0123456789ab\n"}"#,
    ])])
    .await;

    let project = test_project();
    let config = BuilderConfig {
        host: Some(format!("tcp://{}", addr)),
        ..Default::default()
    };

    let report = DockerBuilder::new("myapp", project.path(), config)
        .run()
        .await;

    assert!(report.success, "error: {:?}", report.error);
    assert_eq!(report.image_name, "gsp-myapp");
    assert_eq!(
        report.diagnostics,
        vec![
            "Step 1/2 : FROM alpine".to_string(),
            "Successfully built 0123456789ab".to_string(),
        ]
    );

    let requests = requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("POST /build?t=gsp-myapp&nocache=true HTTP/1.0\r\n"));
    assert!(requests[0].contains("Content-Type: application/x-tar"));
}

#[tokio::test]
async fn test_build_error_reports_daemon_message() {
    let (addr, _requests) = spawn_daemon(vec![ok_response(&[
        r#"{"error":"no space left on device"}"#,
    ])])
    .await;

    let project = test_project();
    let config = BuilderConfig {
        host: Some(format!("tcp://{}", addr)),
        ..Default::default()
    };

    let report = DockerBuilder::new("myapp", project.path(), config)
        .run()
        .await;

    assert!(!report.success);
    match report.error {
        Some(BuildError::BuildFailed(message)) => {
            assert_eq!(message, "no space left on device");
        }
        other => panic!("expected BuildFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_push_error_after_successful_build() {
    let (addr, requests) = spawn_daemon(vec![
        // build
        ok_response(&[r#"{"stream":"Successfully built 0123456789ab\n"}"#]),
        // tag
        "HTTP/1.0 201 Created\r\n\r\n".to_string(),
        // push
        ok_response(&[
            r#"{"status":"The push refers to repository [registry.example.com:5000/gsp-myapp]"}"#,
            r#"{"status":"Preparing","id":"L1"}"#,
            r#"{"error":"denied: requested access to the resource is denied"}"#,
        ]),
    ])
    .await;

    let project = test_project();
    let config = BuilderConfig {
        host: Some(format!("tcp://{}", addr)),
        ssh: None,
        push: Some(PushConfig {
            remote: "registry.example.com:5000".to_string(),
            username: "deploy".to_string(),
            password: "hunter2".to_string(),
            email: "deploy@example.com".to_string(),
        }),
    };

    let report = DockerBuilder::new("myapp", project.path(), config)
        .run()
        .await;

    assert!(!report.success);
    assert!(matches!(report.error, Some(BuildError::PushFailed(_))));
    // ビルドのログは失敗した push の後でも残っている
    assert!(
        report
            .diagnostics
            .contains(&"Successfully built 0123456789ab".to_string())
    );

    let requests = requests.lock().await;
    assert_eq!(requests.len(), 3);
    assert!(
        requests[1].starts_with(
            "POST /images/gsp-myapp/tag?repo=registry.example.com%3A5000%2Fgsp-myapp HTTP/1.0\r\n"
        ),
        "tag request was: {}",
        requests[1]
    );
    assert!(
        requests[2]
            .starts_with("POST /images/registry.example.com%3A5000%2Fgsp-myapp/push HTTP/1.0\r\n")
    );
    assert!(requests[2].contains("X-Registry-Auth: "));
}

#[tokio::test]
async fn test_push_success_with_layer_progress() {
    let (addr, _requests) = spawn_daemon(vec![
        ok_response(&[r#"{"stream":"Successfully built 0123456789ab\n"}"#]),
        "HTTP/1.0 201 Created\r\n\r\n".to_string(),
        ok_response(&[
            r#"{"status":"Preparing","id":"L1"}"#,
            r#"{"status":"Preparing","id":"L2"}"#,
            r#"{"status":"Waiting","id":"L2"}"#,
            r#"{"status":"Layer already exists","id":"L1"}"#,
            r#"{"status":"Pushed","id":"L2"}"#,
            r#"{"status":"latest: digest: sha256:abcd size: 1234"}"#,
        ]),
    ])
    .await;

    let project = test_project();
    let config = BuilderConfig {
        host: Some(format!("tcp://{}", addr)),
        ssh: None,
        push: Some(PushConfig {
            remote: "registry.example.com:5000".to_string(),
            username: "deploy".to_string(),
            password: "hunter2".to_string(),
            email: "deploy@example.com".to_string(),
        }),
    };

    let report = DockerBuilder::new("myapp", project.path(), config)
        .run()
        .await;

    assert!(report.success, "error: {:?}", report.error);
    assert!(
        report
            .diagnostics
            .contains(&"latest: digest: sha256:abcd size: 1234".to_string())
    );
}

#[tokio::test]
async fn test_missing_dockerfile_detected_before_daemon() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();

    // 接続できないエンドポイントでも Dockerfile チェックが先に失敗する
    let config = BuilderConfig {
        host: Some("tcp://127.0.0.1:1".to_string()),
        ..Default::default()
    };

    let report = DockerBuilder::new("myapp", dir.path(), config).run().await;

    assert!(!report.success);
    assert!(matches!(
        report.error,
        Some(BuildError::DockerfileNotFound(_))
    ));
}

#[test]
fn test_tunnel_requires_ssh_binary() {
    // PATH を空にして ssh が見つからない状況を作る。
    // デーモンへの接続を試みる前に失敗すること。
    temp_env::with_var("PATH", Some(""), || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let project = test_project();
        let config: BuilderConfig = serde_json::from_str(
            r#"{
                "host": "tcp://10.255.255.1:2375",
                "ssh": {
                    "tunnel": true,
                    "host": "bastion.example.com",
                    "key": "/tmp/id_ed25519"
                }
            }"#,
        )
        .unwrap();

        let report = runtime.block_on(
            DockerBuilder::new("myapp", project.path(), config).run(),
        );

        assert!(!report.success);
        match report.error {
            Some(BuildError::Tunnel(gitship_tunnel::TunnelError::SshNotFound)) => {}
            other => panic!("expected SshNotFound, got {:?}", other),
        }
    });
}

/// push が失敗しても ssh の子プロセスが残らないこと
///
/// PATH に偽の ssh を置き、`-L` の転送指定と自身の PID をファイルへ
/// 書き出させる。実際のポートフォワードはテスト側のタスクが肩代わりし、
/// パイプライン失敗後に子プロセスが回収済みであることを /proc で確認する。
#[cfg(target_os = "linux")]
#[test]
fn test_tunnel_closed_after_failed_push() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    let shim_dir = tempfile::tempdir().unwrap();
    let spec_file = shim_dir.path().join("forward-spec");
    let shim_path = shim_dir.path().join("ssh");
    fs::write(
        &shim_path,
        format!(
            r#"#!/bin/sh
prev=""
spec=""
for arg in "$@"; do
  if [ "$prev" = "-L" ]; then spec="$arg"; fi
  prev="$arg"
done
echo "$$ $spec" > "{spec_file}"
exec sleep 600
"#,
            spec_file = spec_file.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&shim_path, fs::Permissions::from_mode(0o755)).unwrap();

    // which と sleep が引けるよう、元の PATH の先頭に重ねる
    let path_var = format!(
        "{}:{}",
        shim_dir.path().display(),
        std::env::var("PATH").unwrap_or_default()
    );

    temp_env::with_var("PATH", Some(path_var.as_str()), || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (daemon_addr, _requests) = spawn_daemon(vec![
                ok_response(&[r#"{"stream":"Successfully built 0123456789ab\n"}"#]),
                "HTTP/1.0 201 Created\r\n\r\n".to_string(),
                ok_response(&[r#"{"error":"denied: requested access to the resource is denied"}"#]),
            ])
            .await;

            // 偽 ssh が書き出したローカルポートを拾い、疑似デーモンへ中継する
            let spec_path = spec_file.clone();
            let forwarder = tokio::spawn(async move {
                let (pid, local_port) = loop {
                    if let Ok(content) = fs::read_to_string(&spec_path)
                        && let Some((pid, spec)) = content.trim().split_once(' ')
                        && let Some((port, _)) = spec.split_once(':')
                        && let (Ok(pid), Ok(port)) = (pid.parse::<u32>(), port.parse::<u16>())
                    {
                        break (pid, port);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                };

                let listener = TcpListener::bind(("127.0.0.1", local_port)).await.unwrap();
                tokio::spawn(async move {
                    while let Ok((mut inbound, _)) = listener.accept().await {
                        // トンネルの接続確認プローブはデータを送らずに閉じる。
                        // 中継するとデーモン側のレスポンスを 1 つ消費してしまう。
                        let mut probe = [0u8; 1];
                        match inbound.peek(&mut probe).await {
                            Ok(1..) => {}
                            _ => continue,
                        }
                        let Ok(mut outbound) = tokio::net::TcpStream::connect(daemon_addr).await
                        else {
                            break;
                        };
                        tokio::spawn(async move {
                            tokio::io::copy_bidirectional(&mut inbound, &mut outbound)
                                .await
                                .ok();
                        });
                    }
                });

                pid
            });

            let project = test_project();
            let config = BuilderConfig {
                host: Some(format!("tcp://{}", daemon_addr)),
                ssh: Some(SshConfig {
                    tunnel: true,
                    user: "root".to_string(),
                    host: "build-host.example.com".to_string(),
                    port: 22,
                    key: "/tmp/id_ed25519".to_string(),
                    password: None,
                }),
                push: Some(PushConfig {
                    remote: "registry.example.com:5000".to_string(),
                    username: "deploy".to_string(),
                    password: "hunter2".to_string(),
                    email: "deploy@example.com".to_string(),
                }),
            };

            let report = DockerBuilder::new("myapp", project.path(), config)
                .run()
                .await;
            let ssh_pid = forwarder.await.unwrap();

            assert!(!report.success);
            assert!(matches!(report.error, Some(BuildError::PushFailed(_))));
            // run() から戻った時点で ssh の子プロセスは回収済み
            assert!(!Path::new(&format!("/proc/{}", ssh_pid)).exists());
        });
    });
}

#[tokio::test]
async fn test_daemon_unreachable() {
    let project = test_project();
    let config = BuilderConfig {
        host: Some("tcp://127.0.0.1:1".to_string()),
        ..Default::default()
    };

    let report = DockerBuilder::new("myapp", project.path(), config)
        .run()
        .await;

    assert!(!report.success);
    assert!(matches!(
        report.error,
        Some(BuildError::DaemonUnreachable { .. })
    ));
}

#[tokio::test]
async fn test_build_over_unix_socket() {
    let socket_dir = tempfile::tempdir().unwrap();
    let socket_path = socket_dir.path().join("docker.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let head = read_request(&mut reader).await;
        assert!(head.starts_with("POST /build?t=gsp-myapp&nocache=true HTTP/1.0\r\n"));

        let mut stream = reader.into_inner();
        stream
            .write_all(ok_response(&[r#"{"stream":"ok\n"}"#]).as_bytes())
            .await
            .unwrap();
        stream.shutdown().await.ok();
    });

    let project = test_project();
    let config = BuilderConfig {
        host: Some(format!("unix://{}", socket_path.display())),
        ..Default::default()
    };

    let report = DockerBuilder::new("myapp", project.path(), config)
        .run()
        .await;

    assert!(report.success, "error: {:?}", report.error);
    assert_eq!(report.diagnostics, vec!["ok".to_string()]);
}

#[tokio::test]
async fn test_dockerignore_respected_in_context() {
    // .dockerignore で除外したファイルがコンテキストに含まれないこと
    let project = test_project();
    fs::write(project.path().join("debug.log"), "noise").unwrap();
    fs::write(project.path().join(".dockerignore"), "*.log\n").unwrap();

    let archive = gitship_build::ContextBuilder::create_context(project.path()).unwrap();

    let decoder = flate2::read::GzDecoder::new(&archive[..]);
    let mut tar = tar::Archive::new(decoder);
    let names: Vec<String> = tar
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect();

    assert!(names.iter().any(|n| n == "Dockerfile"));
    assert!(names.iter().any(|n| n == "app.py"));
    assert!(names.iter().all(|n| !n.ends_with(".log")));
}

#[tokio::test]
async fn test_context_entries_are_relative() {
    let project = test_project();
    let archive = gitship_build::ContextBuilder::create_context(project.path()).unwrap();

    let decoder = flate2::read::GzDecoder::new(&archive[..]);
    let mut tar = tar::Archive::new(decoder);
    for entry in tar.entries().unwrap() {
        let entry = entry.unwrap();
        let path = entry.path().unwrap().into_owned();
        assert!(!path.is_absolute());
        assert!(!path.starts_with(Path::new("..")));
    }
}
