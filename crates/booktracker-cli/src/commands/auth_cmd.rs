use crate::auth::{clear_stored_token, mask_token, resolve_token, save_token};
use crate::cli::AuthCommands;
use crate::error::CliError;

pub fn run_auth(command: AuthCommands) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { token } => {
            save_token(&token)?;
            println!("Notion token stored in the OS keychain");
            Ok(())
        }
        AuthCommands::Status => {
            if let Some((token, source)) = resolve_token()? {
                println!(
                    "Notion token {} loaded from {}",
                    mask_token(&token),
                    source.label()
                );
            } else {
                println!("No Notion token. Run `booktracker auth login --token <TOKEN>`.");
            }
            Ok(())
        }
        AuthCommands::Logout => {
            clear_stored_token()?;
            println!("Notion token removed from the OS keychain");
            Ok(())
        }
    }
}
