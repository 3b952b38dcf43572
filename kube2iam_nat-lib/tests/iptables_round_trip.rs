use kube2iam_nat_lib::config::Redirect;
use kube2iam_nat_lib::redirect::{self, Manager, RuleStatus};

const METADATA: &str = "169.254.169.254";

#[test]
fn wildcard_interface_always_exists() -> anyhow::Result<()> {
    redirect::check_interface_exists("eth+")?;
    redirect::check_interface_exists("k2i-absent+")?;
    Ok(())
}

#[test]
fn zero_bind_address_is_rejected_before_touching_iptables() {
    // no root needed: validation happens before the iptables binding is created
    let res = redirect::add_rules(8080, METADATA, "lo", "0.0.0.0");
    assert!(res.as_ref().is_err_and(redirect::Error::is_configuration), "{res:?}");
}

#[test]
fn unknown_interface_is_rejected_before_touching_iptables() {
    let res = redirect::add_rules(8080, METADATA, "k2i-absent0", "127.0.0.1");
    assert!(res.as_ref().is_err_and(redirect::Error::is_not_found), "{res:?}");
}

#[test]
#[ignore = "modifies the host nat table, requires root and the iptables binary"]
fn add_then_clear_chain_on_host() -> anyhow::Result<()> {
    let manager = Manager::real()?;
    let redirect = Redirect {
        app_port: 8181,
        metadata_address: METADATA.to_string(),
        host_interface: "lo".to_string(),
        bind_ip: "127.0.0.1".to_string(),
    };

    assert_eq!(manager.status(&redirect)?, RuleStatus::Absent);

    manager.apply(&redirect)?;
    manager.apply(&redirect)?;
    assert_eq!(manager.status(&redirect)?, RuleStatus::Installed);

    manager.revert(&redirect)?;
    assert_eq!(manager.status(&redirect)?, RuleStatus::Absent);

    // chain is gone, clearing it again must fail
    assert!(manager.clear_rules(METADATA, "lo").is_err());
    Ok(())
}
