use std::{path::Path, sync::Arc};

use reqwest::{
    header::{COOKIE, LOCATION, SET_COOKIE},
    multipart::{Form, Part},
    redirect, Client, StatusCode,
};
use stem_splitter_web::{
    build_router, serve, AppConfig, AppState, DummyModel, ModelGateway, SecretKey,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

struct TestApp {
    base: String,
    dir: TempDir,
    client: Client,
}

impl TestApp {
    async fn spawn(gateway: ModelGateway) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            input_dir: dir.path().join("input_audio"),
            output_dir: dir.path().join("output"),
            secret_key: SecretKey::from_value(Some("test-secret".into())),
            ..AppConfig::default()
        };
        let state = AppState::new(Arc::new(gateway), &config);
        let router = build_router(state, config.max_upload_bytes);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, router));

        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .unwrap();
        Self { base, dir, client }
    }

    fn input_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("input_audio")
    }

    fn output_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("output")
    }

    async fn post(&self, form: Form) -> reqwest::Response {
        self.client
            .post(format!("{}/", self.base))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// Follows a redirect by hand, replaying the flash cookie it set.
    async fn follow(&self, resp: reqwest::Response) -> String {
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[LOCATION], "/");
        let cookie = flash_cookie(&resp).expect("redirect should carry a flash cookie");

        let page = self
            .client
            .get(format!("{}/", self.base))
            .header(COOKIE, cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(page.status(), StatusCode::OK);
        page.text().await.unwrap()
    }
}

fn flash_cookie(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("flash=") && !v.contains("Max-Age=0"))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn file_form(name: &str, bytes: Vec<u8>) -> Form {
    Form::new().part("file", Part::bytes(bytes).file_name(name.to_string()))
}

fn wav_bytes(frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let v = ((i as f32 * 0.02).sin() * 10_000.0) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

#[tokio::test]
async fn get_renders_upload_form() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let resp = app.client.get(format!("{}/", app.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get(SET_COOKIE).is_none());
    let body = resp.text().await.unwrap();
    assert!(body.contains(r#"enctype="multipart/form-data""#));
    assert!(body.contains(r#"name="file""#));
    assert!(!body.contains("flashes"));
}

#[tokio::test]
async fn missing_file_part_is_flashed_once() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let resp = app.post(Form::new().text("comment", "hello")).await;
    let cookie = flash_cookie(&resp).unwrap();
    let body = app.follow(resp).await;
    assert!(body.contains("No file part"));

    // Reading the messages clears them.
    let again = app
        .client
        .get(format!("{}/", app.base))
        .header(COOKIE, cookie)
        .send()
        .await
        .unwrap();
    let cleared = again
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .any(|v| v.to_str().unwrap().contains("Max-Age=0"));
    assert!(cleared);
}

#[tokio::test]
async fn empty_filename_is_flashed() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let resp = app.post(file_form("", Vec::new())).await;
    let body = app.follow(resp).await;
    assert!(body.contains("No selected file"));
    assert!(file_names(&app.input_dir()).is_empty());
}

#[tokio::test]
async fn disallowed_extension_is_ignored() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let resp = app.post(file_form("malware.exe", b"MZ\x90\x00".to_vec())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(flash_cookie(&resp).is_none());
    assert!(resp.text().await.unwrap().contains(r#"name="file""#));
    assert!(file_names(&app.input_dir()).is_empty());
    assert!(file_names(&app.output_dir()).is_empty());
}

#[tokio::test]
async fn uploaded_wav_is_separated_into_mp3_stems() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let resp = app.post(file_form("song.wav", wav_bytes(22_050))).await;
    let body = app.follow(resp).await;

    assert!(body.contains("Uploaded file saved as:"));
    for stem in ["vocals", "drums", "bass", "other"] {
        assert!(body.contains(&format!("Separated {stem} saved as")), "{body}");
    }
    assert!(body.contains("Output files saved in:"));

    assert_eq!(file_names(&app.input_dir()), ["song.wav"]);
    assert_eq!(
        file_names(&app.output_dir()),
        ["song_bass.mp3", "song_drums.mp3", "song_other.mp3", "song_vocals.mp3"]
    );
}

#[tokio::test]
async fn uploaded_name_is_sanitised() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let resp = app.post(file_form("../../my song.wav", wav_bytes(4_410))).await;
    app.follow(resp).await;
    assert_eq!(file_names(&app.input_dir()), ["my_song.wav"]);
    assert!(app.output_dir().join("my_song_vocals.mp3").exists());
}

#[tokio::test]
async fn undecodable_upload_reports_load_error() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let junk = "these bytes are text, not an mp3 stream\n".repeat(64).into_bytes();
    let resp = app.post(file_form("broken.mp3", junk)).await;
    let body = app.follow(resp).await;

    assert!(body.contains("Uploaded file saved as:"));
    assert!(body.contains("Error loading audio file:"));
    assert!(!body.contains("Output files saved in:"));
    assert!(file_names(&app.output_dir()).is_empty());
}

#[tokio::test]
async fn degraded_model_reports_processing_error() {
    let app = TestApp::spawn(ModelGateway::unavailable()).await;
    let resp = app.post(file_form("song.wav", wav_bytes(4_410))).await;
    let body = app.follow(resp).await;

    assert!(body.contains("Uploaded file saved as:"));
    assert!(body.contains("Error processing file:"));
    assert!(file_names(&app.output_dir()).is_empty());
}

#[tokio::test]
async fn forged_flash_cookie_is_ignored() {
    let app = TestApp::spawn(ModelGateway::new(Arc::new(DummyModel::default()))).await;
    let resp = app
        .client
        .get(format!("{}/", app.base))
        .header(COOKIE, "flash=WyJmb3JnZWQiXQ.c2lnbmF0dXJl")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert!(!body.contains("forged"));
    assert!(!body.contains("flashes"));
}
