// Contact profile exchange

use crate::terminal::envelope::{Avatar, ContactProfile, ProfileContent, PROFILE_FULL};
use crate::terminal::sender::Replier;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Self-presence data served to peers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDescriptor {
    pub name: String,
    /// Avatar image file
    pub avatar: Option<PathBuf>,
    pub avatar_ext: String,
    pub version: String,
}

/// Answers contact profile requests
pub struct ProfileResponder {
    profile: ProfileDescriptor,
    base_dir: PathBuf,
}

impl ProfileResponder {
    /// Relative avatar paths resolve against `base_dir`
    pub fn new(profile: ProfileDescriptor, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            base_dir: base_dir.into(),
        }
    }

    pub fn profile(&self) -> &ProfileDescriptor {
        &self.profile
    }

    fn avatar_path(&self, avatar: &Path) -> PathBuf {
        if avatar.is_absolute() {
            avatar.to_path_buf()
        } else {
            self.base_dir.join(avatar)
        }
    }

    /// Build the reply for a request.
    ///
    /// `responseType` mirrors the request type; only a `full` request gets the
    /// name and avatar.
    pub async fn build_response(&self, request: &ContactProfile) -> Result<ContactProfile> {
        let mut response = ContactProfile {
            response_type: request.request_type.clone(),
            version: Some(self.profile.version.clone()),
            ..Default::default()
        };

        if request.request_type.as_deref() != Some(PROFILE_FULL) {
            return Ok(response);
        }

        let avatar = match &self.profile.avatar {
            Some(avatar) => {
                let path = self.avatar_path(avatar);
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read avatar {:?}", path))?;

                Some(Avatar {
                    encoding: "base64".to_string(),
                    data: BASE64.encode(bytes),
                    ext: self.profile.avatar_ext.clone(),
                })
            }
            None => None,
        };

        response.content = Some(ProfileContent {
            name: self.profile.name.clone(),
            avatar,
        });

        Ok(response)
    }

    /// Answer `src` with our profile
    pub async fn respond(&self, src: &str, request: &ContactProfile, replier: &Replier) -> Result<()> {
        let response = self.build_response(request).await?;
        replier
            .send_contact_profile(src, response)
            .await
            .context("Failed to send contact profile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request(kind: &str) -> ContactProfile {
        ContactProfile {
            request_type: Some(kind.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_response_embeds_avatar() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("avatar.png"), [0u8, 1, 2, 255]).unwrap();

        let responder = ProfileResponder::new(
            ProfileDescriptor {
                name: "terminal".to_string(),
                avatar: Some(PathBuf::from("avatar.png")),
                avatar_ext: "png".to_string(),
                version: "7".to_string(),
            },
            dir.path(),
        );

        let response = responder.build_response(&request("full")).await.unwrap();
        assert_eq!(response.response_type.as_deref(), Some("full"));
        assert_eq!(response.version.as_deref(), Some("7"));

        let content = response.content.unwrap();
        assert_eq!(content.name, "terminal");
        let avatar = content.avatar.unwrap();
        assert_eq!(avatar.encoding, "base64");
        assert_eq!(avatar.data, "AAEC/w==");
        assert_eq!(avatar.ext, "png");
    }

    #[tokio::test]
    async fn test_header_response_has_no_content() {
        let responder = ProfileResponder::new(
            ProfileDescriptor {
                name: "terminal".to_string(),
                avatar: Some(PathBuf::from("missing.png")),
                ..Default::default()
            },
            "/nonexistent",
        );

        let response = responder.build_response(&request("header")).await.unwrap();
        assert_eq!(response.response_type.as_deref(), Some("header"));
        assert!(response.content.is_none());
    }

    #[tokio::test]
    async fn test_missing_avatar_file_fails() {
        let dir = tempdir().unwrap();
        let responder = ProfileResponder::new(
            ProfileDescriptor {
                avatar: Some(PathBuf::from("missing.png")),
                ..Default::default()
            },
            dir.path(),
        );

        assert!(responder.build_response(&request("full")).await.is_err());
    }
}
