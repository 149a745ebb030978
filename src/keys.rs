//! Alpine signing key setup and verification.
//!
//! The trust anchors APK uses to verify package signatures are compiled into
//! the binary. They are written to `etc/apk/keys/` of the target tree before
//! the first package is installed. Output is fully determined by the embedded
//! data, so every run produces byte-identical files.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const PEM_BEGIN: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_END: &str = "-----END PUBLIC KEY-----";
const PEM_LINE_WIDTH: usize = 64;

/// An Alpine developer signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustAnchor {
    /// Short hex id, the suffix of the key file name.
    pub id: &'static str,
    /// Base64 DER body of the RSA public key, unwrapped.
    pub key: &'static str,
}

impl TrustAnchor {
    /// File name APK expects for this key.
    pub fn filename(&self) -> String {
        key_filename(self.id)
    }

    /// PEM envelope around the key body, folded at 64 columns.
    pub fn to_pem(&self) -> String {
        let mut pem = String::with_capacity(self.key.len() + 64);
        pem.push_str(PEM_BEGIN);
        pem.push('\n');
        for chunk in self.key.as_bytes().chunks(PEM_LINE_WIDTH) {
            // body is ASCII base64
            pem.push_str(&String::from_utf8_lossy(chunk));
            pem.push('\n');
        }
        pem.push_str(PEM_END);
        pem.push('\n');
        pem
    }
}

/// `alpine-devel@lists.alpinelinux.org-<id>.rsa.pub`
pub fn key_filename(id: &str) -> String {
    format!("alpine-devel@lists.alpinelinux.org-{}.rsa.pub", id)
}

/// Keys shipped by the `alpine-keys` package, indexed by id.
///
/// Adding a new Alpine signing key requires a new entry here.
pub const ALPINE_KEYS: &[TrustAnchor] = &[
    TrustAnchor {
        id: "4a6a0840",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA1yHJxQgsHQREclQu4Ohe\
              qxTxd1tHcNnvnQTu/UrTky8wWvgXT+jpveroeWWnzmsYlDI93eLI2ORakxb3gA2O\
              Q0Ry4ws8vhaxLQGC74uQR5+/yYrLuTKydFzuPaS1dK19qJPXB8GMdmFOijnXX4SA\
              jixuHLe1WW7kZVtjL7nufvpXkWBGjsfrvskdNA/5MfxAeBbqPgaq0QMEfxMAn6/R\
              L5kNepi/Vr4S39Xvf2DzWkTLEK8pcnjNkt9/aafhWqFVW7m3HCAII6h/qlQNQKSo\
              GuH34Q8GsFG30izUENV9avY7hSLq7nggsvknlNBZtFUcmGoQrtx3FmyYsIC8/R+B\
              ywIDAQAB",
    },
    TrustAnchor {
        id: "5243ef4b",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAvNijDxJ8kloskKQpJdx+\
              mTMVFFUGDoDCbulnhZMJoKNkSuZOzBoFC94omYPtxnIcBdWBGnrm6ncbKRlR+6oy\
              6DniCgmm9Uc9xyxMn/DeQAkaxYd2v3DZX8q8hJFcOBgqVTfYKSK5QafTnR+2V5bT\
              6DLU3NBxJMJWF2fkTLvUBlpSKKaQYPpsWFRRbcQHBIZbVaOdnU1G7CIxKtEXdHcB\
              hN7kvwa6rsq6LMAlU4PgRWf7VpsekHCtKgn6LUqhg1j9L3xJSYCNTwGw55lkYX7r\
              pw7yBVx2+PPHYX+hOYUkn+ooz8NvHcl2Q5fnjLDv9+/xmqyEbrqbY+VvsTLoXjKO\
              +QIDAQAB",
    },
    TrustAnchor {
        id: "524d27bb",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAr8s1q88XpuJWLCZALdKj\
              lN8wg2ePB2T9aIcaxryYE/Jkmtu+ZQ5zKq6BT3y/udt5jAsMrhHTwroOjIsF9DeG\
              e8Y3vjz+Hh4L8a7hZDaw8jy3CPag47L7nsZFwQOIo2Cl1SnzUc6/owoyjRU7ab0p\
              iWG5HK8IfiybRbZxnEbNAfT4R53hyI6z5FhyXGS2Ld8zCoU/R4E1P0CUuXKEN4p0\
              64dyeUoOLXEWHjgKiU1mElIQj3k/IF02W89gDj285YgwqA49deLUM7QOd53QLnx+\
              xrIrPv3A+eyXMFgexNwCKQU9ZdmWa00MjjHlegSGK8Y2NPnRoXhzqSP9T9i2HiXL\
              VQIDAQAB",
    },
    TrustAnchor {
        id: "5261cecb",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAwlzMkl7b5PBdfMzGdCT0\
              cGloRr5xGgVmsdq5EtJvFkFAiN8Ac9MCFy/vAFmS8/7ZaGOXoCDWbYVLTLOO2qtX\
              yHRl+7fJVh2N6qrDDFPmdgCi8NaE+3rITWXGrrQ1spJ0B6HIzTDNEjRKnD4xyg4j\
              g01FMcJTU6E+V2JBY45CKN9dWr1JDM/nei/Pf0byBJlMp/mSSfjodykmz4Oe13xB\
              Ca1WTwgFykKYthoLGYrmo+LKIGpMoeEbY1kuUe04UiDe47l6Oggwnl+8XD1MeRWY\
              sWgj8sF4dTcSfCMavK4zHRFFQbGp/YFJ/Ww6U9lA3Vq0wyEI6MCMQnoSMFwrbgZw\
              wwIDAQAB",
    },
    TrustAnchor {
        id: "58199dcc",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA3v8/ye/V/t5xf4JiXLXa\
              hWFRozsnmn3hobON20GdmkrzKzO/eUqPOKTpg2GtvBhK30fu5oY5uN2ORiv2Y2ht\
              eLiZ9HVz3XP8Fm9frha60B7KNu66FO5P2o3i+E+DWTPqqPcCG6t4Znk2BypILcit\
              wiPKTsgbBQR2qo/cO01eLLdt6oOzAaF94NH0656kvRewdo6HG4urbO46tCAizvCR\
              CA7KGFMyad8WdKkTjxh8YLDLoOCtoZmXmQAiwfRe9pKXRH/XXGop8SYptLqyVVQ+\
              tegOD9wRs2tOlgcLx4F/uMzHN7uoho6okBPiifRX+Pf38Vx+ozXh056tjmdZkCaV\
              aQIDAQAB",
    },
    TrustAnchor {
        id: "58cbb476",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAoSPnuAGKtRIS5fEgYPXD\
              8pSGvKAmIv3A08LBViDUe+YwhilSHbYXUEAcSH1KZvOo1WT1x2FNEPBEFEFU1Eyc\
              +qGzbA03UFgBNvArurHQ5Z/GngGqE7IarSQFSoqewYRtFSfp+TL9CUNBvM0rT7vz\
              2eMu3/wWG+CBmb92lkmyWwC1WSWFKO3x8w+Br2IFWvAZqHRt8oiG5QtYvcZL6jym\
              Y8T6sgdDlj+Y+wWaLHs9Fc+7vBuyK9C4O1ORdMPW15qVSl4Lc2Wu1QVwRiKnmA+c\
              DsH/m7kDNRHM7TjWnuj+nrBOKAHzYquiu5iB3Qmx+0gwnrSVf27Arc3ozUmmJbLj\
              zQIDAQAB",
    },
    TrustAnchor {
        id: "58e4f17d",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAvBxJN9ErBgdRcPr5g4hV\
              qyUSGZEKuvQliq2Z9SRHLh2J43+EdB6A+yzVvLnzcHVpBJ+BZ9RV30EM9guck9sh\
              r+bryZcRHyjG2wiIEoduxF2a8KeWeQH7QlpwGhuobo1+gA8L0AGImiA6UP3LOirl\
              I0G2+iaKZowME8/tydww4jx5vG132JCOScMjTalRsYZYJcjFbebQQolpqRaGB4iG\
              WqhytWQGWuKiB1A22wjmIYf3t96l1Mp+FmM2URPxD1gk/BIBnX7ew+2gWppXOK9j\
              1BJpo0/HaX5XoZ/uMqISAAtgHZAqq+g3IUPouxTphgYQRTRYpz2COw3NF43VYQrR\
              bQIDAQAB",
    },
    TrustAnchor {
        id: "5e69ca50",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAwXEJ8uVwJPODshTkf2BH\
              pH5fVVDppOa974+IQJsZDmGd3Ny0dcd+WwYUhNFUW3bAfc3/egaMWCaprfaHn+oS\
              4ddbOFgbX8JCHdru/QMAAU0aEWSMybfJGA569c38fNUF/puX6XK/y0lD2SS3YQ/a\
              oJ5jb5eNrQGR4FaLqm3eU4k8BYJ5yx9ZeGRIb4Fbbmh2w1VWzDaDtPOKPc4/IMml\
              hg4pT9YLtDelGiFfGMmcVr2Cz1Ht7Ibfv4cEbDVC8bh6U5f8HQLQKNnLpSaxXqJZ\
              dptk0rrHbC/xUMVqD6cs7ahbsddSvz3+bPuc4lmcicCNmm6TpQsOM4D9MoGmJNL2\
              zQIDAQAB",
    },
    TrustAnchor {
        id: "60ac2099",
        key: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAwR4uJVtJOnOFGchnMW5Y\
              j5/waBdG1u5BTMlH+iQMcV5+VgWhmpZHJCBz3ocD+0IGk2I68S5TDOHec/GSC0lv\
              6R9o6F7h429GmgPgVKQsc8mPTPtbjJMuLLs4xKc+viCplXc0Nc0ZoHmCH4da6fCV\
              tdpHQjVe6F9zjdquZ4RjV6R6JTiN9v924dGMAkbW/xXmamtz51FzondKC52Gh8Mo\
              /oA0/T0KsCMCi7tb4QNQUYrf+Xcha9uus4ww1kWNZyfXJB87a2kORLiWMfs2IBBJ\
              TmZ2Fnk0JnHDb8Oknxd9PvJPT0mvyT8DA+KIAPqNvOjUXP4bnjEHJcoCP9S5HkGC\
              IQIDAQAB",
    },
    TrustAnchor {
        id: "6165ee59",
        key: "MIICIjANBgkqhkiG9w0BAQEFAAOCAg8AMIICCgKCAgEAutQkua2CAig4VFSJ7v54\
              ALyu/J1WB3oni7qwCZD3veURw7HxpNAj9hR+S5N/pNeZgubQvJWyaPuQDm7PTs1+\
              tFGiYNfAsiibX6Rv0wci3M+z2XEVAeR9Vzg6v4qoofDyoTbovn2LztaNEjTkB+oK\
              tlvpNhg1zhou0jDVYFniEXvzjckxswHVb8cT0OMTKHALyLPrPOJzVtM9C1ew2Nnc\
              3848xLiApMu3NBk0JqfcS3Bo5Y2b1FRVBvdt+2gFoKZix1MnZdAEZ8xQzL/a0YS5\
              Hd0wj5+EEKHfOd3A75uPa/WQmA+o0cBFfrzm69QDcSJSwGpzWrD1ScH3AK8nWvoj\
              v7e9gukK/9yl1b4fQQ00vttwJPSgm9EnfPHLAtgXkRloI27H6/PuLoNvSAMQwuCD\
              hQRlyGLPBETKkHeodfLoULjhDi1K2gKJTMhtbnUcAA7nEphkMhPWkBpgFdrH+5z4\
              Lxy+3ek0cqcI7K68EtrffU8jtUj9LFTUC8dERaIBs7NgQ/LfDbDfGh9g6qVj1hZl\
              k9aaIPTm/xsi8v3u+0qaq7KzIBc9s59JOoA8TlpOaYdVgSQhHHLBaahOuAigH+VI\
              isbC9vmqsThF2QdDtQt37keuqoda2E6sL7PUvIyVXDRfwX7uMDjlzTxHTymvq2Ck\
              htBqojBnThmjJQFgZXocHG8CAwEAAQ==",
    },
    TrustAnchor {
        id: "61666e3f",
        key: "MIICIjANBgkqhkiG9w0BAQEFAAOCAg8AMIICCgKCAgEAlEyxkHggKCXC2Wf5Mzx4\
              nZLFZvU2bgcA3exfNPO/g1YunKfQY+Jg4fr6tJUUTZ3XZUrhmLNWvpvSwDS19ZmC\
              IXOu0+V94aNgnhMsk9rr59I8qcbsQGIBoHzuAl8NzZCgdbEXkiY90w1skUw8J57z\
              qCsMBydAueMXuWqF5nGtYbi5vHwK42PffpiZ7G5Kjwn8nYMW5IZdL6ZnMEVJUWC9\
              I4waeKg0yskczYDmZUEAtrn3laX9677ToCpiKrvmZYjlGl0BaGp3cxggP2xaDbUq\
              qfFxWNgvUAb3pXD09JM6Mt6HSIJaFc9vQbrKB9KT515y763j5CC2KUsilszKi3mB\
              HYe5PoebdjS7D1Oh+tRqfegU2IImzSwW3iwA7PJvefFuc/kNIijfS/gH/cAqAK6z\
              bhdOtE/zc7TtqW2Wn5Y03jIZdtm12CxSxwgtCF1NPyEWyIxAQUX9ACb3M0FAZ61n\
              fpPrvwTaIIxxZ01L3IzPLpbc44x/DhJIEU+iDt6IMTrHOphD9MCG4631eIdB0H1b\
              6zbNX1CXTsafqHRFV9XmYYIeOMggmd90s3xIbEujA6HKNP/gwzO6CDJ+nHFDEqoF\
              SkxRdTkEqjTjVKieURW7Swv7zpfu5PrsrrkyGnsRrBJJzXlm2FOOxnbI2iSL1B5F\
              rO5kbUxFeZUIDq+7Yv4kLWcCAwEAAQ==",
    },
];

/// Install the embedded Alpine signing keys into `keys_dir`.
///
/// The directory is created if absent. Existing key files are overwritten.
pub fn install_keys(keys_dir: &Path) -> Result<Vec<PathBuf>> {
    install_anchors(keys_dir, ALPINE_KEYS)
}

/// Install an explicit set of trust anchors into `keys_dir`.
pub fn install_anchors(keys_dir: &Path, anchors: &[TrustAnchor]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(keys_dir)
        .with_context(|| format!("Failed to create keys directory: {}", keys_dir.display()))?;

    let mut written = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        let key_path = keys_dir.join(anchor.filename());
        fs::write(&key_path, anchor.to_pem())
            .with_context(|| format!("Failed to write key file: {}", key_path.display()))?;
        written.push(key_path);
    }

    tracing::debug!(
        "Alpine signing keys installed ({} keys) in {}",
        anchors.len(),
        keys_dir.display()
    );

    Ok(written)
}

/// Verify that every embedded key is present in `keys_dir` with the exact
/// expected content.
pub fn verify_keys(keys_dir: &Path) -> Result<()> {
    verify_anchors(keys_dir, ALPINE_KEYS)
}

pub fn verify_anchors(keys_dir: &Path, anchors: &[TrustAnchor]) -> Result<()> {
    if !keys_dir.is_dir() {
        bail!(
            "Alpine keys directory does not exist: {}",
            keys_dir.display()
        );
    }

    for anchor in anchors {
        let key_path = keys_dir.join(anchor.filename());
        if !key_path.exists() {
            bail!("Alpine signing key missing: {}", key_path.display());
        }

        let content = fs::read_to_string(&key_path)
            .with_context(|| format!("Failed to read key file: {}", key_path.display()))?;
        if content != anchor.to_pem() {
            bail!(
                "Key file {} does not match the embedded key {}",
                key_path.display(),
                anchor.id
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const TEST_KEYS: &[TrustAnchor] = &[TrustAnchor {
        id: "0000beef",
        key: "MIIBIjANBg==",
    }];

    #[test]
    fn test_pem_envelope() {
        assert_eq!(
            TEST_KEYS[0].to_pem(),
            "-----BEGIN PUBLIC KEY-----\nMIIBIjANBg==\n-----END PUBLIC KEY-----\n"
        );
    }

    #[test]
    fn test_pem_folds_at_64_columns() {
        let pem = ALPINE_KEYS[0].to_pem();
        for line in pem.lines() {
            assert!(line.len() <= PEM_LINE_WIDTH, "line too long: {}", line);
        }
        let body: String = pem
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect();
        assert_eq!(body, ALPINE_KEYS[0].key);
    }

    #[test]
    fn test_key_filename() {
        assert_eq!(
            key_filename("4a6a0840"),
            "alpine-devel@lists.alpinelinux.org-4a6a0840.rsa.pub"
        );
    }

    #[test]
    fn test_embedded_ids_are_unique_hex() {
        let ids: BTreeSet<_> = ALPINE_KEYS.iter().map(|k| k.id).collect();
        assert_eq!(ids.len(), ALPINE_KEYS.len());
        for id in ids {
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_install_keys_one_file_per_anchor() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let keys_dir = temp_dir.path().join("etc/apk/keys");

        install_keys(&keys_dir)?;

        let names: BTreeSet<String> = fs::read_dir(&keys_dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        let expected: BTreeSet<String> = ALPINE_KEYS.iter().map(|k| k.filename()).collect();
        assert_eq!(names, expected);

        for anchor in ALPINE_KEYS {
            let content = fs::read_to_string(keys_dir.join(anchor.filename()))?;
            assert!(content.starts_with(PEM_BEGIN));
            assert!(content.ends_with("-----END PUBLIC KEY-----\n"));
        }

        Ok(())
    }

    #[test]
    fn test_install_keys_is_idempotent() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let keys_dir = temp_dir.path().join("keys");

        let first: Vec<Vec<u8>> = install_keys(&keys_dir)?
            .iter()
            .map(fs::read)
            .collect::<std::io::Result<_>>()?;
        let second: Vec<Vec<u8>> = install_keys(&keys_dir)?
            .iter()
            .map(fs::read)
            .collect::<std::io::Result<_>>()?;

        assert_eq!(first, second);
        verify_keys(&keys_dir)?;

        Ok(())
    }

    #[test]
    fn test_install_overwrites_tampered_key() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let keys_dir = temp_dir.path();

        install_anchors(keys_dir, TEST_KEYS)?;
        fs::write(keys_dir.join(TEST_KEYS[0].filename()), "tampered")?;
        assert!(verify_anchors(keys_dir, TEST_KEYS).is_err());

        install_anchors(keys_dir, TEST_KEYS)?;
        verify_anchors(keys_dir, TEST_KEYS)?;

        Ok(())
    }

    #[test]
    fn test_verify_keys_missing_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;

        let result = verify_keys(&temp_dir.path().join("missing"));
        assert!(
            result.is_err(),
            "Verification should fail when keys dir missing"
        );

        Ok(())
    }

    #[test]
    fn test_verify_keys_missing_file() -> Result<()> {
        let temp_dir = TempDir::new()?;

        let result = verify_anchors(temp_dir.path(), TEST_KEYS);
        assert!(
            result.is_err(),
            "Verification should fail when key files missing"
        );

        Ok(())
    }

    #[test]
    fn test_install_keys_fails_when_dir_cannot_be_created() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "not a directory")?;

        assert!(install_keys(&blocker.join("keys")).is_err());

        Ok(())
    }
}
