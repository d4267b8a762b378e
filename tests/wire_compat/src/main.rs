fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use capystream_protocol::{FrameStream, TransferMetadata};

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_raw(name: &str) -> Vec<u8> {
        let path = fixtures_dir().join(name);
        fs::read(&path).unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_slice(&load_raw(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Decodes a fixture as a handshake frame, re-encodes it and compares
    /// the JSON values (order-independent).
    fn roundtrip_test(name: &str) -> TransferMetadata {
        let metadata = TransferMetadata::decode(&load_raw(name))
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let encoded = metadata
            .encode()
            .unwrap_or_else(|e| panic!("failed to encode {name}: {e}"));
        let reserialized: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        let fixture = load_fixture(name);
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  encoded: {reserialized}"
        );
        metadata
    }

    #[test]
    fn fixture_metadata_minimal() {
        let metadata = roundtrip_test("metadata_minimal.json");
        assert_eq!(metadata.mime_type(), "audio/mpeg");
        assert_eq!(metadata.display_name(), None);
        assert_eq!(metadata.total_bytes(), None);
    }

    #[test]
    fn fixture_metadata_full() {
        let metadata = roundtrip_test("metadata_full.json");
        assert_eq!(metadata.essence(), "audio/ogg");
        assert_eq!(metadata.display_name(), Some("live-set.ogg"));
        assert_eq!(metadata.total_bytes(), Some(614_400));
    }

    #[test]
    fn fixture_metadata_extra_fields_are_ignored() {
        let metadata = TransferMetadata::decode(&load_raw("metadata_extra_fields.json")).unwrap();
        let encoded: serde_json::Value =
            serde_json::from_slice(&metadata.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({ "mimeType": "audio/flac", "displayName": "tone.flac" })
        );
    }

    #[test]
    fn fixture_metadata_empty_mime_is_rejected() {
        assert!(TransferMetadata::decode(&load_raw("metadata_empty_mime.json")).is_err());
    }

    #[test]
    fn encoded_metadata_is_compact_json() {
        let metadata = TransferMetadata::new("audio/mpeg")
            .unwrap()
            .with_display_name("track.mp3");
        assert_eq!(
            &metadata.encode().unwrap()[..],
            br#"{"mimeType":"audio/mpeg","displayName":"track.mp3"}"#
        );
    }

    #[tokio::test]
    async fn frames_carry_a_big_endian_u32_length_prefix() {
        use tokio::io::AsyncReadExt;

        let (a, mut b) = tokio::io::duplex(1024);
        let mut stream = FrameStream::new(a);
        let handshake = TransferMetadata::new("audio/mpeg").unwrap().encode().unwrap();
        stream.send_frame(handshake.clone()).await.unwrap();
        stream
            .send_frame(bytes::Bytes::from_static(&[0xFF, 0xFB]))
            .await
            .unwrap();
        stream.close().await.unwrap();

        let mut wire = Vec::new();
        b.read_to_end(&mut wire).await.unwrap();

        let mut expected = (handshake.len() as u32).to_be_bytes().to_vec();
        expected.extend_from_slice(&handshake);
        expected.extend_from_slice(&[0, 0, 0, 2, 0xFF, 0xFB]);
        assert_eq!(wire, expected);
    }
}
