use crate::{
    Error, Result,
    client::{Credentials, check_status},
    config::EngineConfig,
};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

const WIDEVINE_KEYFORMAT: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";

/// Response of the playback endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PlaybackDescriptor {
    #[serde(rename = "songList", default)]
    pub song_list: Vec<PlaybackEntry>,
    #[serde(default)]
    pub status: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PlaybackEntry {
    #[serde(rename = "hls-key-cert-url", default)]
    pub key_cert_url: Option<String>,
    #[serde(rename = "hls-playlist-url", default)]
    pub playlist_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub flavor: String,
    #[serde(rename = "URL")]
    pub url: String,
}

/// Key declared by a media playlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyReference {
    /// Base64 key id, the second comma separated field of the key uri.
    pub kid: String,
    pub uri: String,
}

/// Everything needed to fetch one track or video.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub playlist_url: String,
    pub variant_flavor: String,
    pub key: Option<KeyReference>,
    /// `EXT-X-MAP` uri. Only keyless playlists may lack one.
    pub init_segment_url: Option<String>,
    /// Media segments in playlist order. Empty for audio with an init
    /// segment, whose url carries the whole file.
    pub media_segment_urls: Vec<String>,
}

impl Manifest {
    /// Init segment first, then every media segment.
    pub fn segment_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(self.media_segment_urls.len() + 1);
        urls.extend(self.init_segment_url.iter().cloned());
        urls.extend(self.media_segment_urls.iter().cloned());
        urls
    }

    pub fn require_key(&self) -> Result<&KeyReference> {
        self.key
            .as_ref()
            .ok_or_else(|| Error::MissingKey(self.playlist_url.clone()))
    }
}

/// Turns content identifiers into [`Manifest`]s.
#[derive(Clone, Debug)]
pub struct ManifestResolver {
    client: Client,
    credentials: Credentials,
    playback_url: String,
    audio_flavor: String,
}

impl ManifestResolver {
    pub fn new(client: Client, credentials: Credentials, config: &EngineConfig) -> Self {
        Self {
            client,
            credentials,
            playback_url: config.playback_url.clone(),
            audio_flavor: config.audio_flavor.clone(),
        }
    }

    pub async fn playback_descriptor(&self, adam_id: &str) -> Result<PlaybackDescriptor> {
        debug!("requesting playback descriptor for {}", adam_id);

        let request = self
            .client
            .post(&self.playback_url)
            .json(&serde_json::json!({ "salableAdamId": adam_id }));
        let response = self
            .credentials
            .authorize(request)
            .send()
            .await
            .map_err(|x| Error::transport(&self.playback_url, x))?;
        check_status(&self.playback_url, response.status())?;

        let text = response
            .text()
            .await
            .map_err(|x| Error::transport(&self.playback_url, x))?;
        serde_json::from_str(&text).map_err(|x| Error::unexpected(&self.playback_url, x))
    }

    /// Playlist url of a music video, returned as is.
    pub async fn resolve_video_url(&self, adam_id: &str) -> Result<String> {
        let descriptor = self.playback_descriptor(adam_id).await?;
        let entry = descriptor.song_list.first().ok_or(Error::Unavailable)?;

        entry
            .playlist_url
            .clone()
            .ok_or_else(|| Error::unexpected(&self.playback_url, "entry has no hls-playlist-url"))
    }

    pub async fn resolve_audio(&self, adam_id: &str) -> Result<Manifest> {
        let descriptor = self.playback_descriptor(adam_id).await?;
        let entry = descriptor.song_list.first().ok_or(Error::Unavailable)?;

        for (i, asset) in entry.assets.iter().enumerate() {
            debug!("asset [{}] flavor={} url={}", i, asset.flavor, asset.url);
        }

        let asset = select_flavor(&entry.assets, &self.audio_flavor)?;
        debug!("selected flavor {}", asset.flavor);

        let text = self.fetch_playlist(&asset.url).await?;
        parse_media_playlist(&asset.url, &text, &asset.flavor, false)
    }

    /// Resolve the media playlist of a video, keeping every segment.
    pub async fn resolve_video(&self, playlist_url: &str) -> Result<Manifest> {
        let text = self.fetch_playlist(playlist_url).await?;
        parse_media_playlist(playlist_url, &text, "", true)
    }

    async fn fetch_playlist(&self, url: &str) -> Result<Vec<u8>> {
        debug!("fetching playlist {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|x| Error::transport(url, x))?;
        check_status(url, response.status())?;

        let bytes = response
            .bytes()
            .await
            .map_err(|x| Error::transport(url, x))?;
        Ok(bytes.to_vec())
    }
}

/// Find the asset whose flavor equals `flavor` exactly.
pub fn select_flavor<'a>(assets: &'a [Asset], flavor: &str) -> Result<&'a Asset> {
    assets
        .iter()
        .find(|x| x.flavor == flavor)
        .ok_or_else(|| Error::NoMatchingVariant(flavor.to_owned()))
}

/// Parse a media playlist fetched from `url`. Segment urls are only
/// collected when `with_segments` is set.
pub fn parse_media_playlist(
    url: &str,
    bytes: &[u8],
    flavor: &str,
    with_segments: bool,
) -> Result<Manifest> {
    let playlist = match m3u8_rs::parse_playlist_res(bytes) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(x)) => x,
        Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => {
            return Err(Error::UnsupportedManifestType(url.to_owned()));
        }
        Err(_) => return Err(Error::Playlist(url.to_owned())),
    };

    let keys = playlist
        .segments
        .iter()
        .filter_map(|x| x.key.as_ref())
        .collect::<Vec<_>>();
    let key = keys
        .iter()
        .filter(|x| x.keyformat.as_deref() == Some(WIDEVINE_KEYFORMAT))
        .chain(keys.iter())
        .find_map(|x| key_reference(x));

    if key.is_none() {
        warn!("no key information found in {}", url);
    }

    let map = playlist.segments.iter().find_map(|x| x.map.as_ref());
    let init_segment_url = match (map, &key) {
        (Some(x), _) => Some(resolve(url, &x.uri)),
        (None, Some(_)) => return Err(Error::MissingMap(url.to_owned())),
        (None, None) => {
            warn!("no init segment in {}, using media segments only", url);
            None
        }
    };

    // Without a map the media segments are the only source of data.
    let media_segment_urls = if with_segments || init_segment_url.is_none() {
        playlist
            .segments
            .iter()
            .map(|x| resolve(url, &x.uri))
            .collect()
    } else {
        Vec::new()
    };

    Ok(Manifest {
        playlist_url: url.to_owned(),
        variant_flavor: flavor.to_owned(),
        key,
        init_segment_url,
        media_segment_urls,
    })
}

fn key_reference(key: &m3u8_rs::Key) -> Option<KeyReference> {
    let uri = key.uri.as_ref()?;
    let kid = uri.split(',').nth(1)?;

    Some(KeyReference {
        kid: kid.to_owned(),
        uri: uri.to_owned(),
    })
}

/// Join `uri` onto the directory of `base`.
fn resolve(base: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_owned();
    }

    let directory = base.rfind('/').map(|x| &base[..x]).unwrap_or(base);
    format!("{}/{}", directory, uri)
}
