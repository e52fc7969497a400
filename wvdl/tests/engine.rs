use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use std::sync::{Arc, Mutex};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};
use wvdl::{
    CdmProvider, ContentDecryption, Credentials, EngineConfig, Error, Event, Events,
    ProtectionHeader, Result, Session, Stage,
};
use wvdl_mp4::fixture::{
    FixtureSample, FixtureTrack, clear_fragment, decrypted_fragment, encrypted_fragment,
};

const KEY: [u8; 16] = [
    0x3c, 0x81, 0x02, 0xee, 0x5d, 0x17, 0x9a, 0x40, 0xc2, 0x6b, 0x0f, 0x93, 0x28, 0x71, 0xb4, 0x06,
];
const KID: &str = "EREREREREREREREREREREQ==";

struct FixedKey;

#[async_trait]
impl ContentDecryption for FixedKey {
    async fn generate_challenge(&mut self, header: &ProtectionHeader) -> Result<Vec<u8>> {
        Ok(header.to_bytes())
    }

    async fn derive_content_key(&mut self, _: &[u8]) -> Result<Vec<u8>> {
        Ok(KEY.to_vec())
    }
}

#[async_trait]
impl CdmProvider for FixedKey {
    async fn open(&self) -> Result<Box<dyn ContentDecryption>> {
        Ok(Box::new(FixedKey))
    }
}

fn samples() -> Vec<FixtureSample> {
    vec![
        FixtureSample::full((0..120).map(|x| x as u8).collect(), vec![4; 8]),
        FixtureSample::with_subsamples(vec![0x5a; 64], vec![5; 8], vec![(16, 48)]),
    ]
}

fn playlist(init: &str, segments: &[&str]) -> String {
    let mut text = format!(
        "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:10\n#EXT-X-MAP:URI=\"{}\"\n\
         #EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"data:text/plain;base64,{}\",\
         KEYFORMAT=\"urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed\",KEYFORMATVERSIONS=\"1\"\n",
        init, KID
    );

    for segment in segments {
        text.push_str(&format!("#EXTINF:10.0,\n{}\n", segment));
    }

    text.push_str("#EXT-X-ENDLIST\n");
    text
}

async fn mount_license(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "errorCode": 0,
            "status": 0,
            "license": STANDARD.encode(b"license"),
        })))
        .mount(server)
        .await;
}

async fn mount_bytes(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Serve `file` as the single segment of track 1440, with its license.
async fn mount_track(server: &MockServer, file: Vec<u8>) {
    Mock::given(method("POST"))
        .and(path("/playback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "songList": [{
                "assets": [
                    { "flavor": "30:cbcp256", "URL": format!("{}/other.m3u8", server.uri()) },
                    { "flavor": "28:ctrp256", "URL": format!("{}/audio/main.m3u8", server.uri()) },
                ]
            }]
        })))
        .mount(server)
        .await;
    mount_bytes(
        server,
        "/audio/main.m3u8",
        playlist("P000_audio.mp4", &["seg0.mp4"]).into_bytes(),
    )
    .await;
    mount_bytes(server, "/audio/P000_audio.mp4", file).await;
    mount_license(server).await;
}

fn session(server: &MockServer, events: Events) -> Session {
    let config = EngineConfig {
        playback_url: format!("{}/playback", server.uri()),
        license_url: format!("{}/license", server.uri()),
        ..Default::default()
    };

    Session::new(
        config,
        Credentials::new("bearer", "user"),
        Arc::new(FixedKey),
        events,
    )
    .unwrap()
}

#[tokio::test]
async fn track_is_fetched_and_decrypted() {
    let server = MockServer::start().await;
    let track = FixtureTrack::cenc();
    let samples = samples();

    let mut file = track.init_segment();
    file.extend(encrypted_fragment(1, &track, &KEY, &samples));
    file.extend(clear_fragment(2, &track, &samples));
    file.extend(encrypted_fragment(3, &track, &KEY, &samples));

    mount_track(&server, file).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let events = {
        let seen = seen.clone();
        Events::new(move |x| seen.lock().unwrap().push(x.clone()))
    };

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("1440.m4a");
    let download = session(&server, events)
        .download_track("1440", &output)
        .await
        .unwrap();

    let mut expected = track.init_segment();
    expected.extend(decrypted_fragment(1, &track, &samples));
    expected.extend(clear_fragment(2, &track, &samples));
    expected.extend(decrypted_fragment(3, &track, &samples));

    assert_eq!(std::fs::read(&output).unwrap(), expected);
    assert_eq!(download.write.written, 1);

    let summary = download.summary.unwrap();
    assert_eq!(summary.fragments, 3);
    assert_eq!(summary.decrypted, 2);
    assert_eq!(summary.passed_through, 1);

    let stages = seen
        .lock()
        .unwrap()
        .iter()
        .filter_map(|x| match x {
            Event::Stage(x) => Some(*x),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        stages,
        vec![
            Stage::ResolvingManifest,
            Stage::AcquiringLicense,
            Stage::Downloading,
            Stage::Decrypting,
            Stage::Done
        ]
    );
}

#[tokio::test]
async fn failed_decryption_leaves_no_output() {
    let server = MockServer::start().await;
    let track = FixtureTrack::cenc();
    let samples = samples();

    let mut broken = encrypted_fragment(2, &track, &KEY, &samples);
    let at = broken.windows(4).position(|x| x == b"trun").unwrap();
    broken[at + 8..at + 12].copy_from_slice(&u32::MAX.to_be_bytes());

    let mut file = track.init_segment();
    file.extend(encrypted_fragment(1, &track, &KEY, &samples));
    file.extend(broken);
    mount_track(&server, file).await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("1440.m4a");
    let result = session(&server, Events::none())
        .download_track("1440", &output)
        .await;

    assert!(matches!(result, Err(Error::Decrypt(_))));
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_flavor_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/playback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "songList": [{ "assets": [{ "flavor": "30:cbcp256", "URL": "x.m3u8" }] }]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("1440.m4a");
    let result = session(&server, Events::none())
        .download_track("1440", &output)
        .await;

    assert!(matches!(result, Err(Error::NoMatchingVariant(x)) if x == "28:ctrp256"));
    assert!(!output.exists());
}

#[tokio::test]
async fn video_playlist_becomes_key_and_urls() {
    let server = MockServer::start().await;

    mount_bytes(
        &server,
        "/video/main.m3u8",
        playlist("init.mp4", &["seg0.mp4", "seg1.mp4"]).into_bytes(),
    )
    .await;
    mount_license(&server).await;

    let url = format!("{}/video/main.m3u8", server.uri());
    let artifact = session(&server, Events::none())
        .key_and_urls(&url, "1533")
        .await
        .unwrap();

    assert_eq!(artifact.key, format!("1:{}", hex::encode(KEY)));
    assert_eq!(
        artifact.urls,
        vec![
            format!("{}/video/init.mp4", server.uri()),
            format!("{}/video/seg0.mp4", server.uri()),
            format!("{}/video/seg1.mp4", server.uri()),
        ]
    );
    assert_eq!(artifact.to_string().parse::<wvdl::KeyAndUrls>().unwrap(), artifact);
}

#[cfg(unix)]
#[tokio::test]
async fn video_segments_are_handed_to_the_tool() {
    use std::{fs, os::unix::fs::PermissionsExt};

    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let program = dir.path().join("fake-mp4decrypt");
    fs::write(&program, "#!/bin/sh\n[ \"$1\" = \"--key\" ] || exit 2\ncp \"$3\" \"$4\"\n").unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

    let mut urls = Vec::new();
    let mut expected: Vec<u8> = Vec::new();

    for (index, name) in ["init.mp4", "seg0.mp4", "seg1.mp4", "seg2.mp4"].iter().enumerate() {
        let body = vec![index as u8; 100 + index];
        expected.extend(&body);
        mount_bytes(&server, &format!("/video/{}", name), body).await;
        urls.push(format!("{}/video/{}", server.uri(), name));
    }

    let config = EngineConfig {
        decrypt_tool: program.to_string_lossy().into_owned(),
        concurrency: 2,
        ..Default::default()
    };
    let session = Session::new(
        config,
        Credentials::new("bearer", "user"),
        Arc::new(FixedKey),
        Events::none(),
    )
    .unwrap();

    let artifact = wvdl::KeyAndUrls::new(&hex::encode(KEY), urls);
    let output = dir.path().join("video.mp4");
    let download = session.decrypt_video(&artifact, &output).await.unwrap();

    assert_eq!(fs::read(&output).unwrap(), expected);
    assert_eq!(download.write.written, 4);
    assert!(download.summary.is_none());
}
