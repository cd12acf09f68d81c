use serde_json::Value;

/// Render a full Job record (as returned by `/api/v1/builds/status`) as
/// human-readable text.
pub fn render_job(job: &Value) -> String {
    let id = job["id"].as_str().unwrap_or("-");
    let status = job["status"].as_str().unwrap_or("-");
    let atom = job["bundle"]["packages"][0]["atom"].as_str().unwrap_or("-");
    let arch = job["bundle"]["metadata"]["target_arch"].as_str().unwrap_or("-");
    let builder = job["assigned_builder"].as_str().unwrap_or("-");
    let retry_count = job["retry_count"].as_u64().unwrap_or(0);
    let created = job["created_at"].as_str().unwrap_or("-");
    let updated = job["updated_at"].as_str().unwrap_or("-");

    let mut out = String::new();
    out.push_str(&format!("Job:        {id}\n"));
    out.push_str(&format!("Package:    {atom}  ({arch})\n"));
    out.push_str(&format!("Status:     {status}\n"));
    out.push_str(&format!("Builder:    {builder}\n"));
    out.push_str(&format!("Retries:    {retry_count}\n"));
    out.push_str(&format!("Created:    {created}\n"));
    out.push_str(&format!("Updated:    {updated}\n"));
    if let Some(error) = job["error"].as_str() {
        out.push_str(&format!("Error:      {error}\n"));
    }
    if let Some(locator) = job["artifact_locator"].as_str() {
        out.push_str(&format!("Artifact:   {locator}\n"));
    }
    out
}

/// Render a list of Job summaries (as returned by `/api/v1/builds/list`) as
/// a fixed-width table.
pub fn render_job_list(jobs: &[Value]) -> String {
    if jobs.is_empty() {
        return "No jobs.\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!(
        "{:<38} {:<10} {:<24} {:<8} {}\n",
        "ID", "STATUS", "ATOM", "RETRY", "ARCH"
    ));
    out.push_str(&format!("{}\n", "-".repeat(90)));
    for job in jobs {
        let id = job["id"].as_str().unwrap_or("-");
        let status = job["status"].as_str().unwrap_or("-");
        let atom = job["atom"].as_str().unwrap_or("-");
        let retry = job["retry_count"].as_u64().unwrap_or(0);
        let arch = job["target_arch"].as_str().unwrap_or("-");
        out.push_str(&format!("{id:<38} {status:<10} {atom:<24} {retry:<8} {arch}\n"));
    }
    out
}
