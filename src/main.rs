use std::{collections::BTreeSet, time::Duration};

use log::{error, info, warn};
use nwpu_oa::{
    login::{self, mfa, qrcode, MfaMethod, MfaStatus, QrLoginForm, QrStatus},
    service::{self, ecampus::EcampusClient},
    OaLogin, PasswordStep, Session, Settings,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),
    #[error(transparent)]
    LoginError(#[from] login::Error),
    #[error(transparent)]
    ServiceError(#[from] service::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("No usable MFA method among {0:?}")]
    NoMfaMethod(BTreeSet<MfaMethod>),
}

type Result<T> = std::result::Result<T, Error>;

const QR_IMAGE_PATH: &str = "qrcode.png";

#[tokio::main]
async fn main() {
    pretty_env_logger::init_timed();
    info!("Starting...");
    if let Err(e) = work().await {
        error!("Error: {}", e);
    }
    info!("Done...");
}

async fn work() -> Result<()> {
    let config = Settings::layers("config")?;
    let settings = Settings::from_config(&config)?;
    let method = config.get_string("login.method").unwrap_or_else(|_| "password".to_string());

    let session = Session::new(settings)?;
    let target = service::ecampus::service_url(&session);
    let mut login = OaLogin::new(&session);
    if login.begin(&target).await? {
        let chain = match method.as_str() {
            "qr" | "qrcode" => qr_login(&login, &target).await?,
            _ => {
                let username = config.get_string("login.username")?;
                let password = config.get_string("login.password")?;
                password_login(&login, &target, &username, &password).await?
            }
        };
        info!("Login finished, landed on {:?}", chain.last());
    }

    match EcampusClient::login(&session).await? {
        Some(client) => {
            let user = client.user_info().await?;
            match user.data.get()? {
                Some(user) => println!("Logged in as {} {:?}", user.username, user.roles),
                None => warn!("User info came back empty: {:?}", user.message),
            }
        }
        None => warn!("No e-campus token, the login did not stick"),
    }
    Ok(())
}

async fn password_login(
    login: &OaLogin<'_>,
    target: &str,
    username: &str,
    password: &str,
) -> Result<nwpu_oa::RedirectChain> {
    let form = match login.password_form(username, password).await? {
        PasswordStep::Ready(form) => form,
        PasswordStep::NeedsMfa { form, detection } => {
            let method = [MfaMethod::Sms, MfaMethod::Email, MfaMethod::AppPush]
                .into_iter()
                .find(|m| detection.methods.contains(m))
                .ok_or_else(|| Error::NoMfaMethod(detection.methods.clone()))?;
            info!("MFA required, using {}", method);
            let session = login.session();
            let mut challenge = mfa::init_challenge(session, method, &detection.state).await?;
            mfa::send(session, &mut challenge).await?;
            if method.needs_code() {
                let code = prompt(&format!("Code sent via {}: ", method)).await?;
                mfa::verify(session, &mut challenge, Some(&code)).await?.into_result()?;
            } else {
                loop {
                    let status = mfa::verify(session, &mut challenge, None).await?.into_result()?;
                    if status == MfaStatus::Valid {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
            form
        }
    };
    Ok(login.complete(target, form).await?)
}

async fn qr_login(login: &OaLogin<'_>, target: &str) -> Result<nwpu_oa::RedirectChain> {
    let session = login.session();
    let challenge = qrcode::qr_init(session).await?;
    tokio::fs::write(QR_IMAGE_PATH, qrcode::qr_image(session).await?).await?;
    println!("Scan {} with the mobile app", QR_IMAGE_PATH);
    loop {
        let status = qrcode::qr_comet(session).await?.status();
        match status {
            QrStatus::Valid => break,
            QrStatus::Invalid | QrStatus::Cancelled | QrStatus::Expired => {
                return Err(login::Error::AuthenticationRequired(format!("QR login ended as {:?}", status)).into());
            }
            QrStatus::Scanned => info!("Scanned, waiting for confirmation"),
            _ => {}
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(login.complete(target, QrLoginForm::new(&challenge.qr_code_key)).await?)
}

async fn prompt(message: &str) -> Result<String> {
    println!("{}", message);
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}
