use aliri_braid::braid;
use std::fmt;

/// Formats at most `max_chars` characters of a secret, marking the cut with `…`
struct Prefix<'a> {
    secret: &'a str,
    max_chars: usize,
}

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.secret.char_indices().nth(self.max_chars) {
            Some((cut, _)) => {
                f.write_str(&self.secret[..cut])?;
                f.write_str("…")
            }
            None => f.write_str(self.secret),
        }
    }
}

// Plain formatting prints only a placeholder. The alternate flag shows a short
// prefix, and a width overrides the prefix length.
macro_rules! masked_secret {
    ($ty:ty: $label:literal, $shown:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    let max_chars = f.width().unwrap_or($shown);
                    write!(
                        f,
                        "\"{}\"",
                        Prefix {
                            secret: self.as_str(),
                            max_chars
                        }
                    )
                } else {
                    f.write_str(concat!("<", $label, ">"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    let max_chars = f.width().unwrap_or($shown);
                    write!(
                        f,
                        "{}",
                        Prefix {
                            secret: self.as_str(),
                            max_chars
                        }
                    )
                } else {
                    f.write_str(concat!("<", $label, ">"))
                }
            }
        }
    };
}

/// The VK Ads application's client ID
#[braid(serde)]
pub struct ClientId;

/// The VK Ads application's client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

masked_secret!(ClientSecretRef: "client secret", 0);

/// A bearer access token issued by the platform
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

masked_secret!(AccessTokenRef: "access token", 12);

/// A refresh token issued alongside an access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

masked_secret!(RefreshTokenRef: "refresh token", 4);
